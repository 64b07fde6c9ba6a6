//! # Handler Registry
//!
//! Maps a message kind tag (the wire `method` string) to the handler that owns it.
//! The push server names the same events under two vocabularies, a legacy one
//! (`WebcastChatMessage`) and an `Im` one (`WebcastImChatMessage`); [`MessageKind`]
//! knows both spellings so handlers can be registered for either or both.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::core::dispatcher::MessageHandler;

/// Naming scheme for message kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vocabulary {
    /// `Webcast<Name>Message`
    Legacy,
    /// `WebcastIm<Name>Message`
    Im,
}

impl Vocabulary {
    pub const ALL: [Vocabulary; 2] = [Vocabulary::Legacy, Vocabulary::Im];

    fn prefix(self) -> &'static str {
        match self {
            Self::Legacy => "Webcast",
            Self::Im => "WebcastIm",
        }
    }
}

impl fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Im => f.write_str("im"),
        }
    }
}

impl FromStr for Vocabulary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "im" => Ok(Self::Im),
            other => Err(format!("unknown vocabulary '{other}' (expected 'legacy' or 'im')")),
        }
    }
}

/// The event kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    Gift,
    Like,
    Member,
    Social,
    RoomUserSeq,
    Fansclub,
    Control,
    EmojiChat,
    RoomStats,
    Room,
    RoomRank,
    RoomStreamAdaptation,
}

impl MessageKind {
    pub const ALL: [MessageKind; 13] = [
        MessageKind::Chat,
        MessageKind::Gift,
        MessageKind::Like,
        MessageKind::Member,
        MessageKind::Social,
        MessageKind::RoomUserSeq,
        MessageKind::Fansclub,
        MessageKind::Control,
        MessageKind::EmojiChat,
        MessageKind::RoomStats,
        MessageKind::Room,
        MessageKind::RoomRank,
        MessageKind::RoomStreamAdaptation,
    ];

    fn stem(self) -> &'static str {
        match self {
            Self::Chat => "ChatMessage",
            Self::Gift => "GiftMessage",
            Self::Like => "LikeMessage",
            Self::Member => "MemberMessage",
            Self::Social => "SocialMessage",
            Self::RoomUserSeq => "RoomUserSeqMessage",
            Self::Fansclub => "FansclubMessage",
            Self::Control => "ControlMessage",
            Self::EmojiChat => "EmojiChatMessage",
            Self::RoomStats => "RoomStatsMessage",
            Self::Room => "RoomMessage",
            Self::RoomRank => "RoomRankMessage",
            Self::RoomStreamAdaptation => "RoomStreamAdaptationMessage",
        }
    }

    /// The kind tag for this kind under `vocabulary`.
    pub fn method(self, vocabulary: Vocabulary) -> String {
        format!("{}{}", vocabulary.prefix(), self.stem())
    }

    /// Reverse lookup of a kind tag in either vocabulary.
    pub fn from_method(method: &str) -> Option<(Self, Vocabulary)> {
        // Im first: its prefix is an extension of the legacy one.
        for vocabulary in [Vocabulary::Im, Vocabulary::Legacy] {
            if let Some(stem) = method.strip_prefix(vocabulary.prefix()) {
                if let Some(kind) = Self::ALL.into_iter().find(|k| k.stem() == stem) {
                    return Some((kind, vocabulary));
                }
            }
        }
        None
    }
}

/// Table of handlers keyed by kind tag.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Binds `handler` to `kind`, replacing any previous binding.
    pub fn insert(&mut self, kind: String, handler: Arc<dyn MessageHandler>) {
        if self.handlers.insert(kind.clone(), handler).is_some() {
            debug!(kind = %kind, "replaced existing handler");
        }
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered kind tags, in no particular order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_vocabularies_resolve_to_the_same_kind() {
        for kind in MessageKind::ALL {
            for vocabulary in Vocabulary::ALL {
                assert_eq!(
                    MessageKind::from_method(&kind.method(vocabulary)),
                    Some((kind, vocabulary))
                );
            }
        }
        assert_eq!(MessageKind::Chat.method(Vocabulary::Im), "WebcastImChatMessage");
        assert_eq!(MessageKind::Chat.method(Vocabulary::Legacy), "WebcastChatMessage");
    }

    #[test]
    fn unknown_methods_do_not_resolve() {
        assert_eq!(MessageKind::from_method("WebcastLinkMicMessage"), None);
        assert_eq!(MessageKind::from_method("ChatMessage"), None);
        assert_eq!(MessageKind::from_method(""), None);
    }

    #[test]
    fn vocabulary_parses_case_insensitively() {
        assert_eq!("IM".parse::<Vocabulary>(), Ok(Vocabulary::Im));
        assert_eq!(" legacy ".parse::<Vocabulary>(), Ok(Vocabulary::Legacy));
        assert!("v2".parse::<Vocabulary>().is_err());
    }
}

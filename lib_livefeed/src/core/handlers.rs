//! # Default Event Handlers
//!
//! One pure function per [`MessageKind`]. Each decodes its payload with the `prost`
//! models in [`crate::codec::events`] and renders a single line of text.
//!
//! | kind                               | disposition |
//! |------------------------------------|-------------|
//! | chat, gift, like, fansclub, emoji  | persist     |
//! | control (broadcast ended)          | persist     |
//! | everything else                    | trace       |
//!
//! A control message with status [`BROADCAST_ENDED_STATUS`] additionally asks the
//! session to end the broadcast.

use chrono::{DateTime, Local};
use prost::Message as _;

use crate::codec::events::{
    ChatMessage, ControlMessage, EmojiChatMessage, FansclubMessage, GiftMessage, LikeMessage,
    MemberMessage, RoomMessage, RoomRankMessage, RoomStatsMessage, RoomStreamAdaptationMessage,
    RoomUserSeqMessage, SocialMessage, User,
};
use crate::core::dispatcher::{Dispatcher, HandlerError, HandlerOutput, HandlerResult};
use crate::core::registry::{MessageKind, Vocabulary};

/// Control status announcing that the broadcast is over.
pub const BROADCAST_ENDED_STATUS: i32 = 3;

/// Registers the default handler of every kind under each of `vocabularies`.
pub fn register_defaults(dispatcher: &mut Dispatcher, vocabularies: &[Vocabulary]) {
    for &vocabulary in vocabularies {
        for kind in MessageKind::ALL {
            let method = kind.method(vocabulary);
            match kind {
                MessageKind::Chat => dispatcher.register(method, chat),
                MessageKind::Gift => dispatcher.register(method, gift),
                MessageKind::Like => dispatcher.register(method, like),
                MessageKind::Member => dispatcher.register(method, member),
                MessageKind::Social => dispatcher.register(method, social),
                MessageKind::RoomUserSeq => dispatcher.register(method, room_user_seq),
                MessageKind::Fansclub => dispatcher.register(method, fansclub),
                MessageKind::Control => dispatcher.register(method, control),
                MessageKind::EmojiChat => dispatcher.register(method, emoji_chat),
                MessageKind::RoomStats => dispatcher.register(method, room_stats),
                MessageKind::Room => dispatcher.register(method, room),
                MessageKind::RoomRank => dispatcher.register(method, room_rank),
                MessageKind::RoomStreamAdaptation => {
                    dispatcher.register(method, room_stream_adaptation)
                }
            }
        }
    }
}

fn stamp(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn require_user(user: Option<User>) -> Result<User, HandlerError> {
    user.ok_or(HandlerError::MissingField("user"))
}

// The web user record codes 1 as male and 2 as female; 0 means the user left it unset.
fn gender_label(gender: u32) -> &'static str {
    match gender {
        1 => "male",
        2 => "female",
        _ => "unknown",
    }
}

pub fn chat(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = ChatMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    Ok(HandlerOutput::persist(format!(
        "[chat] [{}] {}: {} [{}]",
        user.id,
        user.nick_name,
        msg.content,
        stamp(now)
    )))
}

pub fn gift(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = GiftMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    let gift = msg.gift.ok_or(HandlerError::MissingField("gift"))?;
    Ok(HandlerOutput::persist(format!(
        "[gift] {} sent {}x{} [{}]",
        user.nick_name,
        gift.name,
        msg.combo_count,
        stamp(now)
    )))
}

pub fn like(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = LikeMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    Ok(HandlerOutput::persist(format!(
        "[like] {} liked x{} [{}]",
        user.nick_name,
        msg.count,
        stamp(now)
    )))
}

pub fn member(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = MemberMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    Ok(HandlerOutput::trace(format!(
        "[enter] [{}] [{}] {} joined the room [{}]",
        user.id,
        gender_label(user.gender),
        user.nick_name,
        stamp(now)
    )))
}

pub fn social(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = SocialMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    Ok(HandlerOutput::trace(format!(
        "[follow] [{}] {} followed the host [{}]",
        user.id,
        user.nick_name,
        stamp(now)
    )))
}

pub fn room_user_seq(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = RoomUserSeqMessage::decode(payload)?;
    Ok(HandlerOutput::trace(format!(
        "[stats] viewers now: {}, total viewers: {} [{}]",
        msg.total,
        msg.total_pv_for_anchor,
        stamp(now)
    )))
}

pub fn fansclub(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = FansclubMessage::decode(payload)?;
    Ok(HandlerOutput::persist(format!("[fansclub] {} [{}]", msg.content, stamp(now))))
}

pub fn control(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = ControlMessage::decode(payload)?;
    if msg.status == BROADCAST_ENDED_STATUS {
        Ok(HandlerOutput::persist(format!("[control] broadcast ended [{}]", stamp(now))).end_broadcast())
    } else {
        Ok(HandlerOutput::trace(format!(
            "[control] room status {} [{}]",
            msg.status,
            stamp(now)
        )))
    }
}

pub fn emoji_chat(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = EmojiChatMessage::decode(payload)?;
    let user = require_user(msg.user)?;
    let content = if msg.default_content.is_empty() {
        "sent an emoji"
    } else {
        msg.default_content.as_str()
    };
    Ok(HandlerOutput::persist(format!(
        "[emoji] {}: {} (emoji_id={}) [{}]",
        user.nick_name,
        content,
        msg.emoji_id,
        stamp(now)
    )))
}

pub fn room_stats(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = RoomStatsMessage::decode(payload)?;
    Ok(HandlerOutput::trace(format!(
        "[room-stats] {} [{}]",
        msg.display_long,
        stamp(now)
    )))
}

pub fn room(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = RoomMessage::decode(payload)?;
    let common = msg.common.ok_or(HandlerError::MissingField("common"))?;
    Ok(HandlerOutput::trace(format!(
        "[room] room id: {} [{}]",
        common.room_id,
        stamp(now)
    )))
}

pub fn room_rank(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = RoomRankMessage::decode(payload)?;
    let ranks = msg
        .ranks_list
        .iter()
        .enumerate()
        .map(|(i, rank)| {
            let nick = rank.user.as_ref().map(|u| u.nick_name.as_str()).unwrap_or("?");
            format!("{}. {} {}", i + 1, nick, rank.score_str).trim().to_string()
        })
        .collect::<Vec<_>>()
        .join(" | ");
    Ok(HandlerOutput::trace(format!("[rank] {} [{}]", ranks, stamp(now))))
}

pub fn room_stream_adaptation(payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
    let msg = RoomStreamAdaptationMessage::decode(payload)?;
    Ok(HandlerOutput::trace(format!(
        "[adaptation] type {} [{}]",
        msg.adaptation_type,
        stamp(now)
    )))
}

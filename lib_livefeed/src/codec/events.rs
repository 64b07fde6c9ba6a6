//! # Room Event Payloads
//!
//! `prost` models for the per-kind message bodies carried in [`WireMessage::payload`].
//! Each struct declares just the fields the handlers extract.
//!
//! [`WireMessage::payload`]: super::proto_handler::WireMessage

use prost::Message;

/// Metadata common to every room event.
#[derive(Clone, PartialEq, Message)]
pub struct Common {
    #[prost(string, tag = "1")]
    pub method: String,

    #[prost(uint64, tag = "2")]
    pub msg_id: u64,

    #[prost(uint64, tag = "3")]
    pub room_id: u64,

    #[prost(uint64, tag = "4")]
    pub create_time: u64,
}

/// A viewer, as embedded in most events.
#[derive(Clone, PartialEq, Message)]
pub struct User {
    #[prost(uint64, tag = "1")]
    pub id: u64,

    #[prost(uint64, tag = "2")]
    pub short_id: u64,

    #[prost(string, tag = "3")]
    pub nick_name: String,

    /// 1 = male, 2 = female, anything else unknown.
    #[prost(uint32, tag = "4")]
    pub gender: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,

    #[prost(string, tag = "3")]
    pub content: String,
}

/// Gift description nested in a [`GiftMessage`].
#[derive(Clone, PartialEq, Message)]
pub struct GiftStruct {
    #[prost(string, tag = "2")]
    pub describe: String,

    #[prost(uint64, tag = "5")]
    pub id: u64,

    #[prost(string, tag = "16")]
    pub name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct GiftMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(uint64, tag = "2")]
    pub gift_id: u64,

    #[prost(uint64, tag = "5")]
    pub repeat_count: u64,

    #[prost(uint64, tag = "6")]
    pub combo_count: u64,

    #[prost(message, optional, tag = "7")]
    pub user: Option<User>,

    #[prost(message, optional, tag = "15")]
    pub gift: Option<GiftStruct>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LikeMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(uint64, tag = "2")]
    pub count: u64,

    #[prost(uint64, tag = "3")]
    pub total: u64,

    #[prost(message, optional, tag = "5")]
    pub user: Option<User>,
}

/// A viewer entering the room.
#[derive(Clone, PartialEq, Message)]
pub struct MemberMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,

    #[prost(uint64, tag = "3")]
    pub member_count: u64,
}

/// A viewer following the host.
#[derive(Clone, PartialEq, Message)]
pub struct SocialMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,

    #[prost(uint64, tag = "4")]
    pub action: u64,

    #[prost(uint64, tag = "6")]
    pub follow_count: u64,
}

/// Viewer counters for the running broadcast.
#[derive(Clone, PartialEq, Message)]
pub struct RoomUserSeqMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    /// Viewers currently in the room.
    #[prost(int64, tag = "3")]
    pub total: i64,

    #[prost(int64, tag = "7")]
    pub total_user: i64,

    /// Cumulative page views, as rendered for the host.
    #[prost(string, tag = "11")]
    pub total_pv_for_anchor: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct FansclubMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(int32, tag = "2")]
    pub r#type: i32,

    #[prost(string, tag = "3")]
    pub content: String,

    #[prost(message, optional, tag = "4")]
    pub user: Option<User>,
}

/// Room lifecycle status. `status == 3` means the broadcast has ended.
#[derive(Clone, PartialEq, Message)]
pub struct ControlMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(int32, tag = "2")]
    pub status: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct EmojiChatMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(message, optional, tag = "2")]
    pub user: Option<User>,

    #[prost(int64, tag = "3")]
    pub emoji_id: i64,

    #[prost(string, tag = "5")]
    pub default_content: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoomStatsMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(string, tag = "2")]
    pub display_short: String,

    #[prost(string, tag = "3")]
    pub display_middle: String,

    #[prost(string, tag = "4")]
    pub display_long: String,

    #[prost(int64, tag = "5")]
    pub display_value: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoomMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(string, tag = "2")]
    pub content: String,
}

/// One entry of the room leaderboard.
#[derive(Clone, PartialEq, Message)]
pub struct RoomRank {
    #[prost(message, optional, tag = "1")]
    pub user: Option<User>,

    #[prost(string, tag = "2")]
    pub score_str: String,

    #[prost(bool, tag = "3")]
    pub profile_hidden: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoomRankMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(message, repeated, tag = "2")]
    pub ranks_list: Vec<RoomRank>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoomStreamAdaptationMessage {
    #[prost(message, optional, tag = "1")]
    pub common: Option<Common>,

    #[prost(int32, tag = "2")]
    pub adaptation_type: i32,
}

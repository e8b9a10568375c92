//! Data models for chat storage
//!
//! This module contains the canonical shapes every storage variant is decoded into,
//! plus the small enums that select a variant for a session.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatlogError, Result};

/// Numeric message type codes as stored on disk
pub mod msg_type {
    /// Plain text
    pub const TEXT: i64 = 1;
    /// Image
    pub const IMAGE: i64 = 3;
    /// Voice clip
    pub const VOICE: i64 = 34;
    /// Video
    pub const VIDEO: i64 = 43;
    /// Sticker / custom emoji
    pub const EMOJI: i64 = 47;
    /// Application message, refined by subtype
    pub const APP: i64 = 49;
    /// System notice
    pub const SYSTEM: i64 = 10000;
}

/// Application message subtype codes
pub mod app_subtype {
    /// Shared link
    pub const LINK: i64 = 5;
    /// File transfer
    pub const FILE: i64 = 6;
    /// Bundle of forwarded messages
    pub const FORWARDED: i64 = 19;
    /// Mini app card
    pub const MINI_APP: i64 = 33;
    /// Mini app card (newer clients)
    pub const MINI_APP_ALT: i64 = 36;
    /// Video channel post
    pub const VIDEO_CHANNEL: i64 = 51;
    /// Reply quoting an earlier message
    pub const QUOTE: i64 = 57;
    /// "Tap" gesture notice
    pub const TAP: i64 = 62;
}

/// Host platform the storage was written on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Windows desktop client
    Windows,
    /// macOS desktop client
    Darwin,
}

impl Platform {
    /// The platform this binary runs on
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Darwin
        }
    }

    /// Name used in configuration and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Darwin => "darwin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ChatlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "darwin" | "macos" | "mac" => Ok(Self::Darwin),
            other => Err(ChatlogError::InvalidConfig(format!("unknown platform: {other}"))),
        }
    }
}

/// The three storage schemas this crate can decode.
///
/// Chosen once per session from `(platform, version)` and never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageVariant {
    /// Windows client, schema generation 3
    WindowsV3,
    /// macOS client, schema generation 3
    DarwinV3,
    /// Either platform, schema generation 4
    V4,
}

impl StorageVariant {
    /// Select the variant for a platform and schema major version
    pub fn select(platform: Platform, version: u32) -> Result<Self> {
        match (platform, version) {
            (Platform::Windows, 3) => Ok(Self::WindowsV3),
            (Platform::Darwin, 3) => Ok(Self::DarwinV3),
            (_, 4) => Ok(Self::V4),
            (platform, version) => Err(ChatlogError::UnsupportedVariant {
                platform: platform.to_string(),
                version,
            }),
        }
    }

    /// Name used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WindowsV3 => "windows_v3",
            Self::DarwinV3 => "darwin_v3",
            Self::V4 => "v4",
        }
    }
}

impl fmt::Display for StorageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed classification of message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Text message
    Text,
    /// Image message
    Image,
    /// Voice message
    Voice,
    /// Video message
    Video,
    /// Sticker
    Emoji,
    /// Application message with its subtype
    App(AppKind),
    /// System notice
    System,
    /// Anything else; keeps the raw code
    Unknown(i64),
}

/// Application message subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    /// Shared link
    Link,
    /// File transfer
    File,
    /// Forwarded message bundle
    Forwarded,
    /// Mini app card
    MiniApp,
    /// Video channel post
    VideoChannel,
    /// Quoted reply
    QuotedReply,
    /// Tap gesture
    Tap,
    /// Unrecognized subtype; keeps the raw code
    Other(i64),
}

impl MessageKind {
    /// Classify a `(type, subtype)` pair
    #[must_use]
    pub const fn classify(msg_type: i64, sub_type: i64) -> Self {
        match msg_type {
            msg_type::TEXT => Self::Text,
            msg_type::IMAGE => Self::Image,
            msg_type::VOICE => Self::Voice,
            msg_type::VIDEO => Self::Video,
            msg_type::EMOJI => Self::Emoji,
            msg_type::SYSTEM => Self::System,
            msg_type::APP => Self::App(match sub_type {
                app_subtype::LINK => AppKind::Link,
                app_subtype::FILE => AppKind::File,
                app_subtype::FORWARDED => AppKind::Forwarded,
                app_subtype::MINI_APP | app_subtype::MINI_APP_ALT => AppKind::MiniApp,
                app_subtype::VIDEO_CHANNEL => AppKind::VideoChannel,
                app_subtype::QUOTE => AppKind::QuotedReply,
                app_subtype::TAP => AppKind::Tap,
                other => AppKind::Other(other),
            }),
            other => Self::Unknown(other),
        }
    }

    /// Whether the content column carries human-readable text
    #[must_use]
    pub const fn is_text_bearing(&self) -> bool {
        matches!(self, Self::Text | Self::System | Self::App(_))
    }

    /// Readable description; unknown codes embed the raw value
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Text => "text".to_string(),
            Self::Image => "image".to_string(),
            Self::Voice => "voice".to_string(),
            Self::Video => "video".to_string(),
            Self::Emoji => "emoji".to_string(),
            Self::System => "system".to_string(),
            Self::App(app) => match app {
                AppKind::Link => "link".to_string(),
                AppKind::File => "file".to_string(),
                AppKind::Forwarded => "forwarded messages".to_string(),
                AppKind::MiniApp => "mini app".to_string(),
                AppKind::VideoChannel => "video channel".to_string(),
                AppKind::QuotedReply => "quoted reply".to_string(),
                AppKind::Tap => "tap".to_string(),
                AppKind::Other(code) => format!("app message ({code})"),
            },
            Self::Unknown(code) => format!("unknown type ({code})"),
        }
    }
}

/// Canonical message, identical in shape for every storage variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Sort sequence within the talker
    pub seq: i64,
    /// Creation time
    pub time: DateTime<Local>,
    /// Chat the message belongs to (contact or chat room id)
    pub talker: String,
    /// True when the talker is a chat room
    pub is_chat_room: bool,
    /// Author id; empty when the author is the local user and unknown
    pub sender: String,
    /// True if sent by the local user
    pub is_self: bool,
    /// Raw type code
    #[serde(rename = "type")]
    pub msg_type: i64,
    /// Raw subtype code
    pub sub_type: i64,
    /// Decompressed, normalized text content
    pub content: String,
    /// Auxiliary attributes such as media paths
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contents: BTreeMap<String, String>,
    /// Storage variant that produced this message
    pub variant: StorageVariant,
}

impl Message {
    /// Type classification of this message
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        MessageKind::classify(self.msg_type, self.sub_type)
    }

    /// Readable type description
    #[must_use]
    pub fn type_description(&self) -> String {
        self.kind().description()
    }

    /// Global ordering key
    #[must_use]
    pub fn sort_key(&self) -> (i64, i64) {
        (self.time.timestamp(), self.seq)
    }
}

/// Convert a unix timestamp in seconds to local time
#[must_use]
pub fn local_time(secs: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Contact information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Unique account id
    pub user_name: String,
    /// User-chosen alias
    pub alias: String,
    /// Remark set by the local user
    pub remark: String,
    /// Display name
    pub nick_name: String,
    /// True if this is an actual friend rather than a stranger seen in a group
    pub is_friend: bool,
}

impl Contact {
    /// Best display name: remark, then nick name, then user name
    #[must_use]
    pub fn display_name(&self) -> &str {
        [&self.remark, &self.nick_name, &self.user_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or("", String::as_str)
    }

    /// Whether any identifier equals `key` exactly
    #[must_use]
    pub fn matches_exact(&self, key: &str) -> bool {
        [&self.user_name, &self.alias, &self.remark, &self.nick_name]
            .into_iter()
            .any(|s| !s.is_empty() && s == key)
    }

    /// Whether any identifier contains `key`
    #[must_use]
    pub fn matches_fuzzy(&self, key: &str) -> bool {
        [&self.user_name, &self.alias, &self.remark, &self.nick_name]
            .into_iter()
            .any(|s| s.contains(key))
    }
}

/// Member of a chat room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomUser {
    /// Member account id
    pub user_name: String,
    /// Name shown inside the room
    pub display_name: String,
}

/// Chat room (group chat)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// Room id, ends with `@chatroom`
    pub name: String,
    /// Room display name
    pub nick_name: String,
    /// Owner account id
    pub owner: String,
    /// Remark set by the local user
    pub remark: String,
    /// Members
    pub users: Vec<ChatRoomUser>,
}

impl ChatRoom {
    /// Whether the room name, nick name or remark matches `key`
    #[must_use]
    pub fn matches(&self, key: &str, exact: bool) -> bool {
        [&self.name, &self.nick_name, &self.remark].into_iter().any(|s| {
            if exact {
                !s.is_empty() && s == key
            } else {
                s.contains(key)
            }
        })
    }
}

/// Recent conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Talker id
    pub user_name: String,
    /// Sort order as stored
    pub n_order: i64,
    /// Talker display name
    pub nick_name: String,
    /// Preview of the last message
    pub content: String,
    /// Time of the last message
    pub n_time: DateTime<Local>,
}

/// Kind of media blob to look up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Image attachment
    Image,
    /// Video attachment
    Video,
    /// File attachment
    File,
    /// Voice clip
    Voice,
}

impl MediaKind {
    /// Name used in queries and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ChatlogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "img" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            "voice" => Ok(Self::Voice),
            other => Err(ChatlogError::InvalidInput(format!("unknown media kind: {other}"))),
        }
    }
}

/// Resolved media blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    /// Media kind
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Lookup key (content hash or server id)
    pub key: String,
    /// Path relative to the data directory, when the blob lives on disk
    pub path: String,
    /// File name as recorded
    pub name: String,
    /// Size as recorded, or the blob length
    pub size: i64,
    /// Blob bytes, empty when the file could not be read
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Half-open time window `[start, end)`; `None` leaves that side unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound
    pub start: Option<DateTime<Local>>,
    /// Exclusive upper bound
    pub end: Option<DateTime<Local>>,
}

impl TimeRange {
    /// Window with both bounds
    #[must_use]
    pub const fn new(start: Option<DateTime<Local>>, end: Option<DateTime<Local>>) -> Self {
        Self { start, end }
    }

    /// Window from unix seconds, `0` meaning unbounded
    #[must_use]
    pub fn from_secs(start: i64, end: i64) -> Self {
        Self {
            start: (start != 0).then(|| local_time(start)),
            end: (end != 0).then(|| local_time(end)),
        }
    }

    /// Lower bound in unix seconds, `i64::MIN` if unbounded
    #[must_use]
    pub fn start_secs(&self) -> i64 {
        self.start.map_or(i64::MIN, |t| t.timestamp())
    }

    /// Upper bound in unix seconds, `i64::MAX` if unbounded
    #[must_use]
    pub fn end_secs(&self) -> i64 {
        self.end.map_or(i64::MAX, |t| t.timestamp())
    }

    /// Whether `secs` falls inside the window
    #[must_use]
    pub fn contains(&self, secs: i64) -> bool {
        secs >= self.start_secs() && secs < self.end_secs()
    }
}

/// Parameters of a message query
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Time window
    pub range: TimeRange,
    /// Talker id, or several separated by commas
    pub talker: String,
    /// Optional sender filter, comma separated
    pub sender: String,
    /// Optional keyword filter
    pub keyword: String,
    /// Items to skip in the merged stream
    pub offset: usize,
    /// Maximum items to return, 0 for all
    pub limit: usize,
}

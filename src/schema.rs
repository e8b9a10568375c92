//! Storage schema definitions
//!
//! Constants for file groups, table names and file-name patterns of each storage
//! variant. Column names are spelled out in the SQL of the `datasource` modules.

use md5::{Digest, Md5};

/// Logical file group names
pub mod groups {
    /// Message shards
    pub const MESSAGE: &str = "message";
    /// Contacts (and, on some variants, chat rooms and sessions)
    pub const CONTACT: &str = "contact";
    /// Chat rooms, where stored separately
    pub const CHATROOM: &str = "chatroom";
    /// Recent sessions, where stored separately
    pub const SESSION: &str = "session";
    /// Media hardlink index
    pub const MEDIA: &str = "media";
    /// Image hardlink index
    pub const IMAGE: &str = "image";
    /// Video hardlink index
    pub const VIDEO: &str = "video";
    /// File hardlink index
    pub const FILE: &str = "file";
    /// Voice blobs
    pub const VOICE: &str = "voice";
}

/// Description of one file group to register with the connection cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// Logical group name
    pub name: &'static str,
    /// Regex matched against file names
    pub pattern: &'static str,
    /// File names never included even when they match
    pub blacklist: &'static [&'static str],
}

const fn group(name: &'static str, pattern: &'static str) -> GroupSpec {
    GroupSpec {
        name,
        pattern,
        blacklist: &[],
    }
}

/// Windows, schema generation 3
pub mod windows_v3 {
    use super::{group, groups, GroupSpec};

    /// File groups
    pub const GROUPS: &[GroupSpec] = &[
        group(groups::MESSAGE, r"^MSG([0-9]?[0-9])?\.db$"),
        group(groups::CONTACT, r"^MicroMsg\.db$"),
        group(groups::IMAGE, r"^HardLinkImage\.db$"),
        group(groups::VIDEO, r"^HardLinkVideo\.db$"),
        group(groups::FILE, r"^HardLinkFile\.db$"),
        group(groups::VOICE, r"^MediaMSG([0-9]?[0-9])?\.db$"),
    ];

    /// Combined message table
    pub const MSG_TABLE: &str = "MSG";
    /// Contact table
    pub const CONTACT_TABLE: &str = "Contact";
    /// Chat room table
    pub const CHATROOM_TABLE: &str = "ChatRoom";
    /// Session table
    pub const SESSION_TABLE: &str = "Session";
    /// Voice blob table
    pub const VOICE_TABLE: &str = "Media";
}

/// macOS, schema generation 3
pub mod darwin_v3 {
    use super::{group, groups, GroupSpec};

    /// File groups
    pub const GROUPS: &[GroupSpec] = &[
        group(groups::MESSAGE, r"^msg_([0-9]?[0-9])?\.db$"),
        group(groups::CONTACT, r"^wccontact_new2\.db$"),
        group(groups::CHATROOM, r"^group_new\.db$"),
        group(groups::SESSION, r"^session_new\.db$"),
        group(groups::MEDIA, r"^hldata\.db$"),
    ];

    /// Prefix of per-talker message tables
    pub const MSG_TABLE_PREFIX: &str = "Chat_";
    /// Contact table
    pub const CONTACT_TABLE: &str = "WCContact";
    /// Chat room table
    pub const CHATROOM_TABLE: &str = "GroupContact";
    /// Session table
    pub const SESSION_TABLE: &str = "SessionAbstract";
}

/// Either platform, schema generation 4
pub mod v4 {
    use super::{groups, GroupSpec};

    /// File groups
    pub const GROUPS: &[GroupSpec] = &[
        GroupSpec {
            name: groups::MESSAGE,
            pattern: r"^message_([0-9]?[0-9])?\.db$",
            blacklist: &["message_fts.db", "message_resource.db"],
        },
        super::group(groups::CONTACT, r"^contact\.db$"),
        super::group(groups::SESSION, r"^session\.db$"),
        super::group(groups::MEDIA, r"^hardlink\.db$"),
        super::group(groups::VOICE, r"^media_([0-9]?[0-9])?\.db$"),
    ];

    /// Prefix of per-talker message tables
    pub const MSG_TABLE_PREFIX: &str = "Msg_";
    /// Sender id lookup table
    pub const NAME2ID_TABLE: &str = "Name2Id";
    /// Contact table
    pub const CONTACT_TABLE: &str = "contact";
    /// Chat room table
    pub const CHATROOM_TABLE: &str = "chat_room";
    /// Session table
    pub const SESSION_TABLE: &str = "SessionTable";
    /// Voice blob table
    pub const VOICE_TABLE: &str = "VoiceInfo";
}

/// Lowercase hex md5 of a talker id, used in table and directory names
#[must_use]
pub fn talker_hash(talker: &str) -> String {
    hex::encode(Md5::digest(talker.as_bytes()))
}

/// Whether a talker id denotes a chat room
#[must_use]
pub fn is_chat_room(talker: &str) -> bool {
    talker.ends_with("@chatroom")
}

/// Table names are interpolated into SQL, so they must be plain identifiers
#[must_use]
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_talker_hash_is_md5_hex() {
        assert_eq!(talker_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(talker_hash("wxid_a").len(), 32);
    }

    #[test]
    fn test_message_patterns() {
        let re = Regex::new(windows_v3::GROUPS[0].pattern).unwrap();
        assert!(re.is_match("MSG0.db"));
        assert!(re.is_match("MSG12.db"));
        assert!(!re.is_match("MSG0.db-wal"));
        assert!(!re.is_match("MediaMSG0.db"));

        let re = Regex::new(v4::GROUPS[0].pattern).unwrap();
        assert!(re.is_match("message_0.db"));
        assert!(!re.is_match("message_fts.db"));
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("Msg_d41d8cd98f00b204e9800998ecf8427e"));
        assert!(!is_safe_identifier("Msg_x; DROP TABLE"));
        assert!(!is_safe_identifier(""));
    }
}

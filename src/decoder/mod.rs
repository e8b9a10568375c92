//! Schema decoders.
//!
//! Each storage variant stores messages differently: compressed columns, group
//! sender prefixes, protobuf side channels and media paths that must be derived.
//! A [`SchemaDecoder`] turns one raw row of its variant into the canonical
//! [`Message`]. Decoding never fails; damaged optional data is simply left out.
//!
//! The decoder for a session is chosen once from `(platform, version)` together
//! with the matching data source and is never switched per row.

pub mod compress;
pub mod darwin_v3;
pub mod media;
pub mod sidechannel;
pub mod v4;
pub mod windows_v3;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::{msg_type, Message};

pub use darwin_v3::{DarwinV3Decoder, DarwinV3Row};
pub use v4::{V4Decoder, V4Row};
pub use windows_v3::{WindowsV3Decoder, WindowsV3Row};

/// Separator between sender id and body in group chat content
pub const GROUP_SENDER_SEPARATOR: &str = ":\n";

/// Attribute keys of [`Message::contents`]
pub mod attr {
    /// Resolved image path
    pub const IMAGE_FILE: &str = "imgfile";
    /// Resolved video path
    pub const VIDEO_FILE: &str = "videofile";
    /// Thumbnail path
    pub const THUMB: &str = "thumb";
    /// Content hash from the side channel
    pub const MD5: &str = "md5";
    /// Server id used to fetch the voice blob
    pub const VOICE: &str = "voice";
    /// App message title
    pub const TITLE: &str = "title";
    /// App message link
    pub const URL: &str = "url";
}

/// Per-call context shared by every row of one talker
#[derive(Debug, Clone, Copy)]
pub struct TalkerContext<'a> {
    /// Talker the rows belong to; empty when each row carries its own
    pub talker: &'a str,
    /// Data directory for media probing, `None` to skip the filesystem
    pub data_dir: Option<&'a Path>,
}

impl<'a> TalkerContext<'a> {
    /// Context for `talker` with optional media probing under `data_dir`
    #[must_use]
    pub const fn new(talker: &'a str, data_dir: Option<&'a Path>) -> Self {
        Self { talker, data_dir }
    }
}

/// Turns one raw row into a canonical message
pub trait SchemaDecoder: Send + Sync {
    /// Raw row shape of this variant
    type Row;

    /// Decode a row. Deterministic for a given row and filesystem state.
    fn decode(&self, row: &Self::Row, ctx: &TalkerContext<'_>) -> Message;
}

/// Split `"<sender>:\n<body>"` on the first separator
#[must_use]
pub fn split_group_sender(content: &str) -> Option<(&str, &str)> {
    content
        .split_once(GROUP_SENDER_SEPARATOR)
        .filter(|(sender, _)| !sender.is_empty() && !sender.contains('\n'))
}

/// NFC-normalize text
#[must_use]
pub fn normalize(text: &str) -> String {
    text.nfc().collect()
}

/// Fields pulled out of an app-message XML document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    /// `<type>` element
    pub sub_type: Option<i64>,
    /// `<title>` element
    pub title: Option<String>,
    /// `<url>` element
    pub url: Option<String>,
}

fn element_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn first_element(cell: &'static OnceLock<Option<Regex>>, pattern: &str, xml: &str) -> Option<String> {
    let re = element_regex(cell, pattern)?;
    let raw = re.captures(xml)?.get(1)?.as_str().trim();
    let text = match raw.strip_prefix("<![CDATA[").and_then(|s| s.strip_suffix("]]>")) {
        Some(cdata) => cdata.to_string(),
        None => unescape_xml(raw),
    };
    (!text.is_empty()).then_some(text)
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extract subtype, title and url from app-message XML; first occurrence wins
#[must_use]
pub fn parse_app_xml(xml: &str) -> AppInfo {
    static TYPE: OnceLock<Option<Regex>> = OnceLock::new();
    static TITLE: OnceLock<Option<Regex>> = OnceLock::new();
    static URL: OnceLock<Option<Regex>> = OnceLock::new();

    AppInfo {
        sub_type: first_element(&TYPE, r"<type>\s*(\d+)\s*</type>", xml).and_then(|s| s.parse().ok()),
        title: first_element(&TITLE, r"(?s)<title>(.*?)</title>", xml),
        url: first_element(&URL, r"(?s)<url>(.*?)</url>", xml),
    }
}

/// Fill in app-message subtype and attributes from the content XML
pub(crate) fn apply_app_info(message: &mut Message) {
    if message.msg_type != msg_type::APP {
        return;
    }
    let info = parse_app_xml(&message.content);
    if message.sub_type == 0 {
        if let Some(sub) = info.sub_type {
            message.sub_type = sub;
        }
    }
    if let Some(title) = info.title {
        message.contents.insert(attr::TITLE.to_string(), title);
    }
    if let Some(url) = info.url {
        message.contents.insert(attr::URL.to_string(), url);
    }
}

/// Set an attribute when the value is present
pub(crate) fn set_attr(contents: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        contents.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_group_sender() {
        assert_eq!(split_group_sender("alice:\nhello"), Some(("alice", "hello")));
        assert_eq!(split_group_sender("alice:\nline1:\nline2"), Some(("alice", "line1:\nline2")));
        assert_eq!(split_group_sender("no separator"), None);
        assert_eq!(split_group_sender(":\nbody"), None);
    }

    #[test]
    fn test_normalize_composes() {
        assert_eq!(normalize("e\u{301}"), "\u{e9}");
    }

    #[test]
    fn test_parse_app_xml() {
        let xml = "<msg><appmsg><title><![CDATA[A & B]]></title><type>57</type>\
                   <url>https://example.com/?a=1&amp;b=2</url>\
                   <refermsg><type>1</type><title>inner</title></refermsg></appmsg></msg>";
        let info = parse_app_xml(xml);
        assert_eq!(info.sub_type, Some(57));
        assert_eq!(info.title.as_deref(), Some("A & B"));
        assert_eq!(info.url.as_deref(), Some("https://example.com/?a=1&b=2"));
    }

    #[test]
    fn test_parse_app_xml_on_garbage() {
        assert_eq!(parse_app_xml("not xml"), AppInfo::default());
    }
}

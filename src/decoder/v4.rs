//! Schema generation 4, both platforms.
//!
//! Messages sit in per-talker tables `Msg_<md5(talker)>`; the sender id is joined
//! in from `Name2Id`. Content is zstd-framed when large, and `packed_info_data`
//! carries image and video content hashes used to locate media.

use std::collections::BTreeMap;

use tracing::debug;

use super::compress::inflate;
use super::media::{temp_image, temp_video, v4_image, v4_video};
use super::sidechannel::{parse_packed_info, tags};
use super::{apply_app_info, attr, normalize, set_attr, split_group_sender, SchemaDecoder, TalkerContext};
use crate::metrics::MetricsCollector;
use crate::models::{local_time, msg_type, Message, Platform, StorageVariant};
use crate::schema::is_chat_room;

/// `status` value of a message the local user sent
const STATUS_SENT: i64 = 2;

/// One row of a `Msg_<hash>` table joined with `Name2Id`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct V4Row {
    /// `sort_seq`
    pub sort_seq: i64,
    /// `server_id`
    pub server_id: i64,
    /// `local_type`: subtype in the high 32 bits, type in the low 32
    pub local_type: i64,
    /// `Name2Id.user_name` of `real_sender_id`
    pub sender: String,
    /// `create_time`, unix seconds
    pub create_time: i64,
    /// `status`
    pub status: i64,
    /// `message_content`
    pub content: Vec<u8>,
    /// `packed_info_data`
    pub packed_info: Vec<u8>,
}

impl V4Row {
    /// Low half of `local_type`
    #[must_use]
    pub const fn msg_type(&self) -> i64 {
        self.local_type & 0xffff_ffff
    }

    /// High half of `local_type`
    #[must_use]
    pub const fn sub_type(&self) -> i64 {
        self.local_type >> 32
    }
}

/// Decoder for [`V4Row`]; the platform picks the media file suffix
#[derive(Debug, Clone, Copy)]
pub struct V4Decoder {
    platform: Platform,
}

impl V4Decoder {
    /// Decoder for storage written on `platform`
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl Default for V4Decoder {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

impl SchemaDecoder for V4Decoder {
    type Row = V4Row;

    fn decode(&self, row: &V4Row, ctx: &TalkerContext<'_>) -> Message {
        let talker = ctx.talker;
        let chat_room = is_chat_room(talker);
        // Best effort: status is not always set on sent messages, and a direct
        // chat row whose sender differs from the talker is assumed to be ours.
        let is_self = row.status == STATUS_SENT || (!chat_room && talker != row.sender);

        let mut content = inflate(&row.content, false).text;
        let mut sender = row.sender.clone();
        if chat_room {
            if let Some((prefix, body)) = split_group_sender(&content) {
                sender = prefix.to_string();
                content = body.to_string();
            }
        }
        if sender.is_empty() && !is_self {
            sender = talker.to_string();
        }

        let mut message = Message {
            seq: row.sort_seq,
            time: local_time(row.create_time),
            talker: talker.to_string(),
            is_chat_room: chat_room,
            sender,
            is_self,
            msg_type: row.msg_type(),
            sub_type: row.sub_type(),
            content: normalize(&content),
            contents: BTreeMap::new(),
            variant: StorageVariant::V4,
        };
        apply_app_info(&mut message);

        let packed = if row.packed_info.is_empty() {
            BTreeMap::new()
        } else {
            parse_packed_info(&row.packed_info).unwrap_or_else(|e| {
                debug!(talker, seq = row.sort_seq, error = %e, "Ignoring malformed packed info");
                MetricsCollector::default().record_decode_fallback("side_channel");
                BTreeMap::new()
            })
        };

        match message.msg_type {
            msg_type::IMAGE => {
                let temp = ctx.data_dir.and_then(|dir| temp_image(dir, talker, row.create_time));
                set_attr(&mut message.contents, attr::IMAGE_FILE, temp);
                if let Some(md5) = packed.get(&tags::IMAGE_MD5) {
                    let paths = v4_image(ctx.data_dir, talker, &message.time, md5, self.platform);
                    message.contents.insert(attr::MD5.to_string(), md5.clone());
                    set_attr(&mut message.contents, attr::IMAGE_FILE, paths.image);
                    set_attr(&mut message.contents, attr::THUMB, paths.thumb);
                }
            }
            msg_type::VIDEO => {
                let temp = ctx.data_dir.and_then(|dir| temp_video(dir, talker, row.create_time));
                set_attr(&mut message.contents, attr::VIDEO_FILE, temp);
                if let Some(md5) = packed.get(&tags::VIDEO_MD5) {
                    let paths = v4_video(ctx.data_dir, &message.time, md5);
                    message.contents.insert(attr::MD5.to_string(), md5.clone());
                    set_attr(&mut message.contents, attr::VIDEO_FILE, paths.video);
                    set_attr(&mut message.contents, attr::THUMB, paths.thumb);
                }
            }
            msg_type::VOICE => {
                message
                    .contents
                    .insert(attr::VOICE.to_string(), row.server_id.to_string());
            }
            _ => {}
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::sidechannel::encode;
    use crate::schema::talker_hash;

    fn row(local_type: i64, sender: &str, content: &[u8]) -> V4Row {
        V4Row {
            sort_seq: 1_700_000_000_001,
            server_id: 555,
            local_type,
            sender: sender.to_string(),
            create_time: 1_700_000_000,
            status: 4,
            content: content.to_vec(),
            packed_info: Vec::new(),
        }
    }

    #[test]
    fn test_local_type_halves() {
        let r = row((57_i64 << 32) | 49, "wxid_a", b"");
        assert_eq!(r.msg_type(), 49);
        assert_eq!(r.sub_type(), 57);
    }

    #[test]
    fn test_zstd_content_in_group() {
        let framed = zstd::stream::encode_all(&b"alice:\nhello"[..], 3).unwrap();
        let msg = V4Decoder::new(Platform::Windows).decode(&row(1, "", &framed), &TalkerContext::new("1@chatroom", None));
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_self);
    }

    #[test]
    fn test_self_heuristic_direct_chat() {
        let decoder = V4Decoder::new(Platform::Darwin);
        let ctx = TalkerContext::new("wxid_friend", None);

        let received = decoder.decode(&row(1, "wxid_friend", b"hi"), &ctx);
        assert!(!received.is_self);
        assert_eq!(received.sender, "wxid_friend");

        let sent = decoder.decode(&row(1, "wxid_me", b"hi"), &ctx);
        assert!(sent.is_self);
        assert_eq!(sent.sender, "wxid_me");

        let mut by_status = row(1, "wxid_friend", b"hi");
        by_status.status = STATUS_SENT;
        assert!(decoder.decode(&by_status, &ctx).is_self);
    }

    #[test]
    fn test_image_hash_from_packed_info() {
        let md5 = "0123456789abcdef0123456789abcdef";
        let mut image = Vec::new();
        encode::bytes_field(4, md5.as_bytes(), &mut image);
        let mut packed = Vec::new();
        encode::bytes_field(3, &image, &mut packed);

        let mut r = row(3, "wxid_friend", b"<msg><img/></msg>");
        r.packed_info = packed;
        let msg = V4Decoder::new(Platform::Windows).decode(&r, &TalkerContext::new("wxid_friend", None));
        let dir = format!("msg/attach/{}/{}/Img", talker_hash("wxid_friend"), msg.time.format("%Y-%m"));
        assert_eq!(msg.contents.get(attr::MD5).map(String::as_str), Some(md5));
        assert_eq!(
            msg.contents.get(attr::IMAGE_FILE),
            Some(&format!("{dir}/{md5}_W.dat"))
        );
        assert_eq!(msg.contents.get(attr::THUMB), Some(&format!("{dir}/{md5}_t_W.dat")));
    }

    #[test]
    fn test_voice_reference() {
        let msg = V4Decoder::new(Platform::Windows).decode(&row(34, "wxid_friend", b""), &TalkerContext::new("wxid_friend", None));
        assert_eq!(msg.contents.get(attr::VOICE).map(String::as_str), Some("555"));
    }
}

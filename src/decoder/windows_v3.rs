//! Windows, schema generation 3.
//!
//! All talkers share the `MSG` table of each shard. Text lives in `StrContent`;
//! app messages keep their XML as a bare LZ4 block in `CompressContent`. The true
//! sender of a group message and some media paths travel in `BytesExtra`.

use std::collections::BTreeMap;

use tracing::debug;

use super::compress::inflate;
use super::media::{strip_first_component, temp_image, temp_video};
use super::sidechannel::{parse_extra, tags};
use super::{apply_app_info, attr, normalize, set_attr, split_group_sender, SchemaDecoder, TalkerContext};
use crate::metrics::MetricsCollector;
use crate::models::{local_time, msg_type, Message, StorageVariant};
use crate::schema::is_chat_room;

/// One row of the `MSG` table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowsV3Row {
    /// `MsgSvrID`
    pub msg_svr_id: i64,
    /// `Sequence`
    pub sequence: i64,
    /// `CreateTime`, unix seconds
    pub create_time: i64,
    /// `StrTalker`
    pub talker: String,
    /// `IsSender`, 1 when sent by the local user
    pub is_sender: i64,
    /// `Type`
    pub msg_type: i64,
    /// `SubType`
    pub sub_type: i64,
    /// `StrContent`
    pub str_content: String,
    /// `CompressContent`
    pub compress_content: Vec<u8>,
    /// `BytesExtra`
    pub bytes_extra: Vec<u8>,
}

/// Decoder for [`WindowsV3Row`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsV3Decoder;

impl SchemaDecoder for WindowsV3Decoder {
    type Row = WindowsV3Row;

    fn decode(&self, row: &WindowsV3Row, ctx: &TalkerContext<'_>) -> Message {
        let talker = if row.talker.is_empty() { ctx.talker } else { row.talker.as_str() };
        let chat_room = is_chat_room(talker);
        let is_self = row.is_sender == 1;

        let mut content = row.str_content.clone();
        if row.msg_type == msg_type::APP && !row.compress_content.is_empty() {
            let inflated = inflate(&row.compress_content, true);
            if !inflated.fallback && !inflated.text.is_empty() {
                content = inflated.text;
            }
        }

        let extra = if row.bytes_extra.is_empty() {
            BTreeMap::new()
        } else {
            parse_extra(&row.bytes_extra).unwrap_or_else(|e| {
                debug!(talker, seq = row.sequence, error = %e, "Ignoring malformed extra bytes");
                MetricsCollector::default().record_decode_fallback("side_channel");
                BTreeMap::new()
            })
        };

        // Tag 1 is authoritative; a prefix is only stripped when it names the same id
        let sender = if chat_room {
            match extra.get(&tags::SENDER).filter(|s| !s.is_empty()) {
                Some(recorded) => {
                    if let Some((prefix, body)) = split_group_sender(&content) {
                        if prefix == recorded.as_str() {
                            content = body.to_string();
                        }
                    }
                    recorded.clone()
                }
                None => match split_group_sender(&content) {
                    Some((sender, body)) => {
                        let sender = sender.to_string();
                        content = body.to_string();
                        sender
                    }
                    None => talker.to_string(),
                },
            }
        } else if is_self {
            String::new()
        } else {
            talker.to_string()
        };

        let mut message = Message {
            seq: row.sequence,
            time: local_time(row.create_time),
            talker: talker.to_string(),
            is_chat_room: chat_room,
            sender,
            is_self,
            msg_type: row.msg_type,
            sub_type: row.sub_type,
            content: normalize(&content),
            contents: BTreeMap::new(),
            variant: StorageVariant::WindowsV3,
        };
        apply_app_info(&mut message);

        match row.msg_type {
            msg_type::IMAGE => {
                let probed = ctx.data_dir.and_then(|dir| temp_image(dir, talker, row.create_time));
                set_attr(&mut message.contents, attr::IMAGE_FILE, probed);
                set_attr(
                    &mut message.contents,
                    attr::THUMB,
                    extra.get(&tags::THUMB_PATH).map(|p| strip_first_component(p)),
                );
            }
            msg_type::VIDEO => {
                let probed = ctx.data_dir.and_then(|dir| temp_video(dir, talker, row.create_time));
                let recorded = extra.get(&tags::MEDIA_PATH).map(|p| strip_first_component(p));
                set_attr(&mut message.contents, attr::VIDEO_FILE, recorded.or(probed));
                set_attr(
                    &mut message.contents,
                    attr::THUMB,
                    extra.get(&tags::THUMB_PATH).map(|p| strip_first_component(p)),
                );
            }
            msg_type::VOICE => {
                message
                    .contents
                    .insert(attr::VOICE.to_string(), row.msg_svr_id.to_string());
            }
            _ => {}
        }

        message
    }
}

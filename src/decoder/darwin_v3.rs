//! macOS, schema generation 3.
//!
//! Messages sit in per-talker tables `Chat_<md5(talker)>`. Content is plain text
//! with group senders prefixed inline; there is no side channel.

use std::collections::BTreeMap;

use super::compress::inflate;
use super::media::{temp_image, temp_video};
use super::{apply_app_info, attr, normalize, set_attr, split_group_sender, SchemaDecoder, TalkerContext};
use crate::models::{local_time, msg_type, Message, StorageVariant};
use crate::schema::is_chat_room;

/// One row of a `Chat_<hash>` table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DarwinV3Row {
    /// `mesLocalID`
    pub local_id: i64,
    /// `mesSvrID`
    pub svr_id: i64,
    /// `msgCreateTime`, unix seconds
    pub create_time: i64,
    /// `msgContent`, raw bytes
    pub content: Vec<u8>,
    /// `messageType`
    pub msg_type: i64,
    /// `mesDes`, 0 when sent by the local user
    pub mes_des: i64,
}

/// Decoder for [`DarwinV3Row`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DarwinV3Decoder;

impl SchemaDecoder for DarwinV3Decoder {
    type Row = DarwinV3Row;

    fn decode(&self, row: &DarwinV3Row, ctx: &TalkerContext<'_>) -> Message {
        let talker = ctx.talker;
        let chat_room = is_chat_room(talker);
        let is_self = row.mes_des == 0;

        let mut content = inflate(&row.content, false).text;
        let sender = if chat_room {
            match split_group_sender(&content) {
                Some((sender, body)) => {
                    let sender = sender.to_string();
                    content = body.to_string();
                    sender
                }
                None => talker.to_string(),
            }
        } else if is_self {
            String::new()
        } else {
            talker.to_string()
        };

        let mut message = Message {
            seq: row.local_id,
            time: local_time(row.create_time),
            talker: talker.to_string(),
            is_chat_room: chat_room,
            sender,
            is_self,
            msg_type: row.msg_type,
            sub_type: 0,
            content: normalize(&content),
            contents: BTreeMap::new(),
            variant: StorageVariant::DarwinV3,
        };
        apply_app_info(&mut message);

        if let Some(dir) = ctx.data_dir {
            match row.msg_type {
                msg_type::IMAGE => {
                    set_attr(&mut message.contents, attr::IMAGE_FILE, temp_image(dir, talker, row.create_time));
                }
                msg_type::VIDEO => {
                    set_attr(&mut message.contents, attr::VIDEO_FILE, temp_video(dir, talker, row.create_time));
                }
                _ => {}
            }
        }

        message
    }
}

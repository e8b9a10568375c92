//! Schema generation 4, both platforms.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use super::{bytes_at, checked_table, int_at, media_from_file, table_exists, text_at, DataSource};
use crate::decoder::sidechannel::parse_room_members;
use crate::decoder::{SchemaDecoder, TalkerContext, V4Decoder, V4Row};
use crate::error::Result;
use crate::models::{local_time, ChatRoom, Contact, Media, MediaKind, Message, Platform, Session, StorageVariant, TimeRange};
use crate::schema::{groups, talker_hash, v4, GroupSpec};

/// `contact.local_type` of a stranger seen only inside a chat room
const LOCAL_TYPE_STRANGER: i64 = 3;

const CONTACT_SQL: &str = "SELECT username, alias, remark, nick_name, local_type FROM contact";

const CHATROOM_SQL: &str = "SELECT r.username, r.owner, r.ext_buffer, IFNULL(c.nick_name, ''), IFNULL(c.remark, '') \
     FROM chat_room r LEFT JOIN contact c ON c.username = r.username";

const SESSION_SQL: &str = "SELECT username, summary, last_timestamp, sort_timestamp \
     FROM SessionTable ORDER BY sort_timestamp DESC";

const VOICE_SQL: &str = "SELECT voice_data FROM VoiceInfo WHERE svr_id = ?1";

/// Row source for generation 4 storage
#[derive(Debug, Clone)]
pub struct V4Source {
    data_dir: PathBuf,
    decoder: V4Decoder,
}

impl V4Source {
    /// Source reading media below `data_dir`; `platform` selects media suffixes
    pub fn new(data_dir: &Path, platform: Platform) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            decoder: V4Decoder::new(platform),
        }
    }

    fn hardlink_table(kind: MediaKind) -> Option<&'static str> {
        match kind {
            MediaKind::Image => Some("image_hardlink_info_v3"),
            MediaKind::Video => Some("video_hardlink_info_v3"),
            MediaKind::File => Some("file_hardlink_info_v3"),
            MediaKind::Voice => None,
        }
    }
}

/// Relative path of a hardlinked file
fn hardlink_path(kind: MediaKind, dir1: &str, dir2: &str, name: &str) -> String {
    match kind {
        MediaKind::Image => format!("msg/attach/{dir1}/{dir2}/Img/{name}"),
        MediaKind::Video => format!("msg/video/{dir1}/{name}"),
        MediaKind::File | MediaKind::Voice => format!("msg/file/{dir1}/{name}"),
    }
}

impl DataSource for V4Source {
    fn variant(&self) -> StorageVariant {
        StorageVariant::V4
    }

    fn groups(&self) -> &'static [GroupSpec] {
        v4::GROUPS
    }

    fn session_group(&self) -> &'static str {
        groups::SESSION
    }

    fn media_group(&self, kind: MediaKind) -> Option<&'static str> {
        Some(match kind {
            MediaKind::Image | MediaKind::Video | MediaKind::File => groups::MEDIA,
            MediaKind::Voice => groups::VOICE,
        })
    }

    fn messages(&self, conn: &Connection, talker: &str, range: &TimeRange) -> Result<Vec<Message>> {
        let table = checked_table(format!("{}{}", v4::MSG_TABLE_PREFIX, talker_hash(talker)))?;
        if !table_exists(conn, &table)? {
            return Ok(Vec::new());
        }

        let (sender_col, join) = if table_exists(conn, v4::NAME2ID_TABLE)? {
            (
                "IFNULL(n.user_name, '')",
                format!("LEFT JOIN {} n ON m.real_sender_id = n.rowid", v4::NAME2ID_TABLE),
            )
        } else {
            ("''", String::new())
        };
        let sql = format!(
            "SELECT m.sort_seq, m.server_id, m.local_type, {sender_col}, m.create_time, m.status, \
             m.message_content, m.packed_info_data FROM {table} m {join} \
             WHERE m.create_time >= ?1 AND m.create_time < ?2 ORDER BY m.sort_seq ASC"
        );

        let ctx = TalkerContext::new(talker, Some(&self.data_dir));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![range.start_secs(), range.end_secs()], |row| {
            Ok(V4Row {
                sort_seq: int_at(row, 0)?,
                server_id: int_at(row, 1)?,
                local_type: int_at(row, 2)?,
                sender: text_at(row, 3)?,
                create_time: int_at(row, 4)?,
                status: int_at(row, 5)?,
                content: bytes_at(row, 6)?,
                packed_info: bytes_at(row, 7)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(self.decoder.decode(&row?, &ctx));
        }
        Ok(messages)
    }

    fn contacts(&self, conn: &Connection) -> Result<Vec<Contact>> {
        let mut stmt = conn.prepare_cached(CONTACT_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(Contact {
                user_name: text_at(row, 0)?,
                alias: text_at(row, 1)?,
                remark: text_at(row, 2)?,
                nick_name: text_at(row, 3)?,
                is_friend: int_at(row, 4)? != LOCAL_TYPE_STRANGER,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn chat_rooms(&self, conn: &Connection) -> Result<Vec<ChatRoom>> {
        let mut stmt = conn.prepare_cached(CHATROOM_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                text_at(row, 0)?,
                text_at(row, 1)?,
                bytes_at(row, 2)?,
                text_at(row, 3)?,
                text_at(row, 4)?,
            ))
        })?;

        let mut rooms = Vec::new();
        for row in rows {
            let (name, owner, ext_buffer, nick_name, remark) = row?;
            rooms.push(ChatRoom {
                name,
                nick_name,
                owner,
                remark,
                users: parse_room_members(&ext_buffer).unwrap_or_default(),
            });
        }
        Ok(rooms)
    }

    fn sessions(&self, conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare_cached(SESSION_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(Session {
                user_name: text_at(row, 0)?,
                content: text_at(row, 1)?,
                n_time: local_time(int_at(row, 2)?),
                n_order: int_at(row, 3)?,
                nick_name: String::new(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn media(&self, conn: &Connection, kind: MediaKind, key: &str) -> Result<Option<Media>> {
        let Some(table) = Self::hardlink_table(kind) else {
            let svr_id: i64 = match key.parse() {
                Ok(id) => id,
                Err(_) => return Ok(None),
            };
            if !table_exists(conn, v4::VOICE_TABLE)? {
                return Ok(None);
            }
            let blob = conn
                .query_row(VOICE_SQL, params![svr_id], |row| bytes_at(row, 0))
                .optional()?;
            return Ok(blob.map(|data| Media {
                kind,
                key: key.to_string(),
                path: String::new(),
                name: format!("{key}.silk"),
                size: i64::try_from(data.len()).unwrap_or(i64::MAX),
                data,
            }));
        };

        let sql = format!(
            "SELECT f.file_name, f.file_size, IFNULL(d1.username, ''), IFNULL(d2.username, '') FROM {table} f \
             LEFT JOIN dir2id d1 ON d1.rowid = f.dir1 \
             LEFT JOIN dir2id d2 ON d2.rowid = f.dir2 WHERE f.md5 = ?1"
        );
        let found = conn
            .query_row(&sql, params![key], |row| {
                Ok((text_at(row, 0)?, int_at(row, 1)?, text_at(row, 2)?, text_at(row, 3)?))
            })
            .optional()?;
        Ok(found.map(|(name, size, dir1, dir2)| {
            let rel = hardlink_path(kind, &dir1, &dir2, &name);
            media_from_file(&self.data_dir, kind, key, rel, name, size)
        }))
    }
}

//! macOS, schema generation 3.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use super::{bytes_at, checked_table, int_at, media_from_file, table_exists, text_at, DataSource};
use crate::decoder::{DarwinV3Decoder, DarwinV3Row, SchemaDecoder, TalkerContext};
use crate::error::Result;
use crate::models::{local_time, ChatRoom, ChatRoomUser, Contact, Media, MediaKind, Message, Session, StorageVariant, TimeRange};
use crate::schema::{darwin_v3, groups, is_chat_room, talker_hash, GroupSpec};

const CONTACT_SQL: &str = "SELECT m_nsUsrName, m_nsAliasName, m_nsRemark, nickname FROM WCContact";

const CHATROOM_SQL: &str = "SELECT m_nsUsrName, nickname, m_nsRemark, m_nsChatRoomMemList, m_nsChatRoomAdminList \
     FROM GroupContact";

const SESSION_SQL: &str = "SELECT m_nsUserName, m_uLastTime FROM SessionAbstract ORDER BY m_uLastTime DESC";

const MEDIA_SQL: &str = "SELECT d.relativePath, d.fileName, r.mediaSize FROM HlinkMediaRecord r \
     JOIN HlinkMediaDetail d ON r.inodeNumber = d.inodeNumber WHERE r.mediaMd5 = ?1";

/// Row source for macOS generation 3 storage
#[derive(Debug, Clone)]
pub struct DarwinV3Source {
    data_dir: PathBuf,
    decoder: DarwinV3Decoder,
}

impl DarwinV3Source {
    /// Source reading media below `data_dir`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            decoder: DarwinV3Decoder,
        }
    }
}

/// First entry of a `;`-separated id list
fn first_id(list: &str) -> String {
    list.split(';').map(str::trim).find(|s| !s.is_empty()).unwrap_or_default().to_string()
}

impl DataSource for DarwinV3Source {
    fn variant(&self) -> StorageVariant {
        StorageVariant::DarwinV3
    }

    fn groups(&self) -> &'static [GroupSpec] {
        darwin_v3::GROUPS
    }

    fn chat_room_group(&self) -> &'static str {
        groups::CHATROOM
    }

    fn session_group(&self) -> &'static str {
        groups::SESSION
    }

    fn media_group(&self, kind: MediaKind) -> Option<&'static str> {
        match kind {
            MediaKind::Image | MediaKind::Video | MediaKind::File => Some(groups::MEDIA),
            MediaKind::Voice => None,
        }
    }

    fn messages(&self, conn: &Connection, talker: &str, range: &TimeRange) -> Result<Vec<Message>> {
        let table = checked_table(format!("{}{}", darwin_v3::MSG_TABLE_PREFIX, talker_hash(talker)))?;
        if !table_exists(conn, &table)? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT mesLocalID, mesSvrID, msgCreateTime, msgContent, messageType, mesDes FROM {table} \
             WHERE msgCreateTime >= ?1 AND msgCreateTime < ?2 ORDER BY msgCreateTime ASC, mesLocalID ASC"
        );
        let ctx = TalkerContext::new(talker, Some(&self.data_dir));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![range.start_secs(), range.end_secs()], |row| {
            Ok(DarwinV3Row {
                local_id: int_at(row, 0)?,
                svr_id: int_at(row, 1)?,
                create_time: int_at(row, 2)?,
                content: bytes_at(row, 3)?,
                msg_type: int_at(row, 4)?,
                mes_des: int_at(row, 5)?,
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
            let user_name = text_at(row, 0)?;
            Ok(Contact {
                is_friend: !is_chat_room(&user_name),
                user_name,
                alias: text_at(row, 1)?,
                remark: text_at(row, 2)?,
                nick_name: text_at(row, 3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn chat_rooms(&self, conn: &Connection) -> Result<Vec<ChatRoom>> {
        let mut stmt = conn.prepare_cached(CHATROOM_SQL)?;
        let rows = stmt.query_map([], |row| {
            let members = text_at(row, 3)?;
            Ok(ChatRoom {
                name: text_at(row, 0)?,
                nick_name: text_at(row, 1)?,
                remark: text_at(row, 2)?,
                owner: first_id(&text_at(row, 4)?),
                users: members
                    .split(';')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(|u| ChatRoomUser {
                        user_name: u.to_string(),
                        display_name: String::new(),
                    })
                    .collect(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn sessions(&self, conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare_cached(SESSION_SQL)?;
        let rows = stmt.query_map([], |row| {
            let last = int_at(row, 1)?;
            Ok(Session {
                user_name: text_at(row, 0)?,
                n_order: last,
                nick_name: String::new(),
                content: String::new(),
                n_time: local_time(last),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn media(&self, conn: &Connection, kind: MediaKind, key: &str) -> Result<Option<Media>> {
        if kind == MediaKind::Voice {
            return Ok(None);
        }
        let found = conn
            .query_row(MEDIA_SQL, params![key], |row| {
                Ok((text_at(row, 0)?, text_at(row, 1)?, int_at(row, 2)?))
            })
            .optional()?;
        Ok(found.map(|(dir, name, size)| {
            let dir = dir.trim_matches('/');
            let rel = if dir.is_empty() {
                format!("Message/MessageTemp/{name}")
            } else {
                format!("Message/MessageTemp/{dir}/{name}")
            };
            media_from_file(&self.data_dir, kind, key, rel, name, size)
        }))
    }
}

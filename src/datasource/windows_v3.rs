//! Windows, schema generation 3.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use super::{bytes_at, int_at, md5_blob, media_from_file, table_exists, text_at, DataSource};
use crate::decoder::sidechannel::parse_room_members;
use crate::decoder::{SchemaDecoder, TalkerContext, WindowsV3Decoder, WindowsV3Row};
use crate::error::Result;
use crate::models::{
    local_time, ChatRoom, ChatRoomUser, Contact, Media, MediaKind, Message, Session, StorageVariant, TimeRange,
};
use crate::schema::{groups, windows_v3, GroupSpec};

/// Separator of the legacy member list column
const MEMBER_LIST_SEPARATOR: char = '\u{7}';

const MESSAGE_SQL: &str = "SELECT MsgSvrID, Sequence, CreateTime, StrTalker, IsSender, Type, SubType, \
     StrContent, CompressContent, BytesExtra \
     FROM MSG WHERE StrTalker = ?1 AND CreateTime >= ?2 AND CreateTime < ?3 \
     ORDER BY Sequence ASC";

const CONTACT_SQL: &str = "SELECT UserName, Alias, Remark, NickName, Reserved1 FROM Contact";

const CHATROOM_SQL: &str = "SELECT r.ChatRoomName, r.UserNameList, r.RoomData, r.Reserved2, \
     IFNULL(c.NickName, ''), IFNULL(c.Remark, '') \
     FROM ChatRoom r LEFT JOIN Contact c ON c.UserName = r.ChatRoomName";

const SESSION_SQL: &str = "SELECT strUsrName, nOrder, strNickName, strContent, nTime \
     FROM Session ORDER BY nOrder DESC";

const VOICE_SQL: &str = "SELECT Buf FROM Media WHERE Reserved0 = ?1";

/// Row source for Windows generation 3 storage
#[derive(Debug, Clone)]
pub struct WindowsV3Source {
    data_dir: PathBuf,
    decoder: WindowsV3Decoder,
}

impl WindowsV3Source {
    /// Source reading media below `data_dir`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            decoder: WindowsV3Decoder,
        }
    }

    fn hardlink_sql(kind: MediaKind) -> Option<&'static str> {
        match kind {
            MediaKind::Image => Some(
                "SELECT a.FileName, IFNULL(d1.Dir, ''), IFNULL(d2.Dir, '') FROM HardLinkImageAttribute a \
                 LEFT JOIN HardLinkImageID d1 ON a.DirID1 = d1.DirId \
                 LEFT JOIN HardLinkImageID d2 ON a.DirID2 = d2.DirId WHERE a.Md5 = ?1",
            ),
            MediaKind::Video => Some(
                "SELECT a.FileName, IFNULL(d1.Dir, ''), IFNULL(d2.Dir, '') FROM HardLinkVideoAttribute a \
                 LEFT JOIN HardLinkVideoID d1 ON a.DirID1 = d1.DirId \
                 LEFT JOIN HardLinkVideoID d2 ON a.DirID2 = d2.DirId WHERE a.Md5 = ?1",
            ),
            MediaKind::File => Some(
                "SELECT a.FileName, IFNULL(d1.Dir, ''), IFNULL(d2.Dir, '') FROM HardLinkFileAttribute a \
                 LEFT JOIN HardLinkFileID d1 ON a.DirID1 = d1.DirId \
                 LEFT JOIN HardLinkFileID d2 ON a.DirID2 = d2.DirId WHERE a.Md5 = ?1",
            ),
            MediaKind::Voice => None,
        }
    }
}

/// Relative path of a hardlinked file
fn hardlink_path(kind: MediaKind, dir1: &str, dir2: &str, name: &str) -> String {
    match kind {
        MediaKind::Image => format!("FileStorage/MsgAttach/{dir1}/Image/{dir2}/{name}"),
        MediaKind::Video => format!("FileStorage/Video/{dir2}/{name}"),
        MediaKind::File | MediaKind::Voice => format!("FileStorage/File/{dir2}/{name}"),
    }
}

impl DataSource for WindowsV3Source {
    fn variant(&self) -> StorageVariant {
        StorageVariant::WindowsV3
    }

    fn groups(&self) -> &'static [GroupSpec] {
        windows_v3::GROUPS
    }

    fn media_group(&self, kind: MediaKind) -> Option<&'static str> {
        Some(match kind {
            MediaKind::Image => groups::IMAGE,
            MediaKind::Video => groups::VIDEO,
            MediaKind::File => groups::FILE,
            MediaKind::Voice => groups::VOICE,
        })
    }

    fn messages(&self, conn: &Connection, talker: &str, range: &TimeRange) -> Result<Vec<Message>> {
        if !table_exists(conn, windows_v3::MSG_TABLE)? {
            return Ok(Vec::new());
        }
        let ctx = TalkerContext::new(talker, Some(&self.data_dir));
        let mut stmt = conn.prepare_cached(MESSAGE_SQL)?;
        let rows = stmt.query_map(params![talker, range.start_secs(), range.end_secs()], |row| {
            Ok(WindowsV3Row {
                msg_svr_id: int_at(row, 0)?,
                sequence: int_at(row, 1)?,
                create_time: int_at(row, 2)?,
                talker: text_at(row, 3)?,
                is_sender: int_at(row, 4)?,
                msg_type: int_at(row, 5)?,
                sub_type: int_at(row, 6)?,
                str_content: text_at(row, 7)?,
                compress_content: bytes_at(row, 8)?,
                bytes_extra: bytes_at(row, 9)?,
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
                is_friend: int_at(row, 4)? == 1,
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
                text_at(row, 5)?,
            ))
        })?;

        let mut rooms = Vec::new();
        for row in rows {
            let (name, member_list, room_data, owner, nick_name, remark) = row?;
            let mut users = parse_room_members(&room_data).unwrap_or_default();
            if users.is_empty() {
                users = member_list
                    .split(MEMBER_LIST_SEPARATOR)
                    .filter(|u| !u.is_empty())
                    .map(|u| ChatRoomUser {
                        user_name: u.to_string(),
                        display_name: String::new(),
                    })
                    .collect();
            }
            rooms.push(ChatRoom {
                name,
                nick_name,
                owner,
                remark,
                users,
            });
        }
        Ok(rooms)
    }

    fn sessions(&self, conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare_cached(SESSION_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(Session {
                user_name: text_at(row, 0)?,
                n_order: int_at(row, 1)?,
                nick_name: text_at(row, 2)?,
                content: text_at(row, 3)?,
                n_time: local_time(int_at(row, 4)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn media(&self, conn: &Connection, kind: MediaKind, key: &str) -> Result<Option<Media>> {
        if kind == MediaKind::Voice {
            let svr_id: i64 = match key.parse() {
                Ok(id) => id,
                Err(_) => return Ok(None),
            };
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
        }

        let Some(sql) = Self::hardlink_sql(kind) else {
            return Ok(None);
        };
        let found = conn
            .query_row(sql, params![md5_blob(key)?], |row| {
                Ok((text_at(row, 0)?, text_at(row, 1)?, text_at(row, 2)?))
            })
            .optional()?;
        Ok(found.map(|(name, dir1, dir2)| {
            let rel = hardlink_path(kind, &dir1, &dir2, &name);
            media_from_file(&self.data_dir, kind, key, rel, name, 0)
        }))
    }
}

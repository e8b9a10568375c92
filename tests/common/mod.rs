//! Fixture builders for on-disk chat data directories
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};

use chatlog_rust::db::OpenOptions;
use chatlog_rust::models::Platform;
use chatlog_rust::schema::talker_hash;
use chatlog_rust::service::{ChatlogDb, QueryLimits};

pub const FRIEND: &str = "wxid_friend";
pub const STRANGER: &str = "wxid_stranger";
pub const ROOM: &str = "123@chatroom";
pub const IMAGE_MD5: &str = "00112233445566778899aabbccddeeff";
pub const VOICE_ID: &str = "42";

/// Create a database at `path` (and its parents) and run `sql` on it
pub fn create_db(path: &Path, sql: &str) -> Connection {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
    conn
}

/// Options with no copies and an immediate close after invalidation
pub fn test_options(work_dir: &Path) -> OpenOptions {
    OpenOptions {
        copy_before_open: false,
        work_dir: work_dir.to_path_buf(),
        close_grace: Duration::ZERO,
        poll_interval: None,
    }
}

pub fn open(dir: &Path, platform: Platform, version: u32) -> ChatlogDb {
    ChatlogDb::with_options(
        dir,
        platform,
        version,
        test_options(&dir.join(".work")),
        QueryLimits::default(),
    )
    .unwrap()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

// ---- Windows, generation 3 ----

const WINDOWS_MSG_SCHEMA: &str = "CREATE TABLE MSG (localId INTEGER PRIMARY KEY AUTOINCREMENT, \
     MsgSvrID INTEGER, Sequence INTEGER, CreateTime INTEGER, StrTalker TEXT, IsSender INTEGER, \
     Type INTEGER, SubType INTEGER, StrContent TEXT, CompressContent BLOB, BytesExtra BLOB);";

/// Text row for a Windows `MSG` table
pub struct WinRow<'a> {
    pub seq: i64,
    pub time: i64,
    pub talker: &'a str,
    pub is_sender: bool,
    pub content: &'a str,
}

pub fn windows_msg_shard(path: &Path, rows: &[WinRow<'_>]) {
    let conn = create_db(path, WINDOWS_MSG_SCHEMA);
    for row in rows {
        conn.execute(
            "INSERT INTO MSG (MsgSvrID, Sequence, CreateTime, StrTalker, IsSender, Type, SubType, StrContent) \
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6)",
            params![row.seq + 9000, row.seq, row.time, row.talker, i64::from(row.is_sender), row.content],
        )
        .unwrap();
    }
}

/// Two interleaved message shards for `FRIEND` with ten rows each: times
/// 1000..1019, even times in `MSG0.db`, odd times in `MSG1.db`
pub fn windows_two_shards(root: &Path) {
    for shard in 0..2i64 {
        let rows: Vec<WinRow<'_>> = (0..10)
            .map(|i| {
                let time = 1000 + i * 2 + shard;
                WinRow {
                    seq: time,
                    time,
                    talker: FRIEND,
                    is_sender: i % 3 == 0,
                    content: "",
                }
            })
            .collect();
        let path = root.join("Msg").join("Multi").join(format!("MSG{shard}.db"));
        windows_msg_shard(&path, &rows);
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE MSG SET StrContent = 'msg ' || CreateTime", []).unwrap();
    }
}

/// Contacts, chat room and sessions in `MicroMsg.db`
pub fn windows_micromsg(root: &Path) {
    let conn = create_db(
        &root.join("Msg").join("MicroMsg.db"),
        "CREATE TABLE Contact (UserName TEXT PRIMARY KEY, Alias TEXT, Remark TEXT, NickName TEXT, Reserved1 INTEGER); \
         CREATE TABLE ChatRoom (ChatRoomName TEXT PRIMARY KEY, UserNameList TEXT, RoomData BLOB, Reserved2 TEXT); \
         CREATE TABLE Session (strUsrName TEXT PRIMARY KEY, nOrder INTEGER, strNickName TEXT, strContent TEXT, nTime INTEGER);",
    );
    conn.execute_batch(
        "INSERT INTO Contact VALUES ('wxid_friend', 'friend_alias', 'Bestie', 'Friend', 1); \
         INSERT INTO Contact VALUES ('wxid_stranger', '', '', 'Someone', 0); \
         INSERT INTO Contact VALUES ('123@chatroom', '', '', 'Team', 1); \
         INSERT INTO Session VALUES ('wxid_friend', 2, '', 'latest', 2000); \
         INSERT INTO Session VALUES ('123@chatroom', 1, 'Team', 'hello team', 1500);",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO ChatRoom VALUES ('123@chatroom', ?1, NULL, 'wxid_friend')",
        params![format!("{FRIEND}\u{7}{STRANGER}")],
    )
    .unwrap();
}

/// Image hardlink index plus the image file itself
pub fn windows_hardlink_image(root: &Path) {
    let conn = create_db(
        &root.join("Msg").join("HardLinkImage.db"),
        "CREATE TABLE HardLinkImageID (DirId INTEGER PRIMARY KEY, Dir TEXT); \
         CREATE TABLE HardLinkImageAttribute (Md5Hash INTEGER, Md5 BLOB, FileName TEXT, DirID1 INTEGER, DirID2 INTEGER); \
         INSERT INTO HardLinkImageID VALUES (1, 'friendhash'); \
         INSERT INTO HardLinkImageID VALUES (2, '2024-01');",
    );
    conn.execute(
        "INSERT INTO HardLinkImageAttribute VALUES (1, ?1, 'pic.dat', 1, 2)",
        params![hex::decode(IMAGE_MD5).unwrap()],
    )
    .unwrap();
    write_file(
        &root.join("FileStorage/MsgAttach/friendhash/Image/2024-01/pic.dat"),
        b"IMAGE-BYTES",
    );
}

pub fn windows_voice(root: &Path) {
    let conn = create_db(
        &root.join("Msg").join("Multi").join("MediaMSG0.db"),
        "CREATE TABLE Media (Key TEXT, Reserved0 INTEGER, Buf BLOB);",
    );
    conn.execute(
        "INSERT INTO Media VALUES ('k', ?1, ?2)",
        params![VOICE_ID.parse::<i64>().unwrap(), b"SILK".to_vec()],
    )
    .unwrap();
}

/// A complete Windows generation 3 data directory
pub fn windows_fixture(root: &Path) {
    windows_two_shards(root);
    windows_micromsg(root);
    windows_hardlink_image(root);
    windows_voice(root);
    let conn = Connection::open(root.join("Msg").join("Multi").join("MSG0.db")).unwrap();
    conn.execute(
        "INSERT INTO MSG (MsgSvrID, Sequence, CreateTime, StrTalker, IsSender, Type, SubType, StrContent) \
         VALUES (1, 1500, 1500, ?1, 0, 1, 0, ?2)",
        params![ROOM, format!("{FRIEND}:\nhello team")],
    )
    .unwrap();
}

// ---- macOS, generation 3 ----

pub fn darwin_fixture(root: &Path) {
    let table = format!("Chat_{}", talker_hash(FRIEND));
    let conn = create_db(
        &root.join("Message").join("msg_0.db"),
        &format!(
            "CREATE TABLE {table} (mesLocalID INTEGER PRIMARY KEY, mesSvrID INTEGER, msgCreateTime INTEGER, \
             msgContent TEXT, msgStatus INTEGER, messageType INTEGER, mesDes INTEGER);"
        ),
    );
    for (id, time, content, des) in [(1, 100, "hi there", 1), (2, 200, "hello back", 0), (3, 300, "bye", 1)] {
        conn.execute(
            &format!("INSERT INTO {table} VALUES (?1, ?2, ?3, ?4, 0, 1, ?5)"),
            params![id, id + 500, time, content, des],
        )
        .unwrap();
    }

    let room_table = format!("Chat_{}", talker_hash(ROOM));
    let conn = create_db(
        &root.join("Message").join("msg_1.db"),
        &format!(
            "CREATE TABLE {room_table} (mesLocalID INTEGER PRIMARY KEY, mesSvrID INTEGER, msgCreateTime INTEGER, \
             msgContent TEXT, msgStatus INTEGER, messageType INTEGER, mesDes INTEGER);"
        ),
    );
    conn.execute(
        &format!("INSERT INTO {room_table} VALUES (1, 9, 150, ?1, 0, 1, 1)"),
        params![format!("{STRANGER}:\nin the room")],
    )
    .unwrap();

    create_db(
        &root.join("Contact").join("wccontact_new2.db"),
        "CREATE TABLE WCContact (m_nsUsrName TEXT, m_nsAliasName TEXT, m_nsRemark TEXT, nickname TEXT); \
         INSERT INTO WCContact VALUES ('wxid_friend', 'friend_alias', '', 'Friend'); \
         INSERT INTO WCContact VALUES ('123@chatroom', '', '', 'Team');",
    );
    create_db(
        &root.join("Group").join("group_new.db"),
        "CREATE TABLE GroupContact (m_nsUsrName TEXT, nickname TEXT, m_nsRemark TEXT, \
         m_nsChatRoomMemList TEXT, m_nsChatRoomAdminList TEXT); \
         INSERT INTO GroupContact VALUES ('123@chatroom', 'Team', '', 'wxid_friend;wxid_stranger', 'wxid_friend');",
    );
    create_db(
        &root.join("Session").join("session_new.db"),
        "CREATE TABLE SessionAbstract (m_nsUserName TEXT, m_uLastTime INTEGER); \
         INSERT INTO SessionAbstract VALUES ('wxid_friend', 300); \
         INSERT INTO SessionAbstract VALUES ('123@chatroom', 150);",
    );
    create_db(
        &root.join("hlink").join("hldata.db"),
        &format!(
            "CREATE TABLE HlinkMediaRecord (mediaMd5 TEXT, inodeNumber INTEGER, mediaSize INTEGER); \
             CREATE TABLE HlinkMediaDetail (inodeNumber INTEGER, relativePath TEXT, fileName TEXT); \
             INSERT INTO HlinkMediaRecord VALUES ('{IMAGE_MD5}', 7, 11); \
             INSERT INTO HlinkMediaDetail VALUES (7, 'abc/Img', 'photo.jpg');"
        ),
    );
    write_file(&root.join("Message/MessageTemp/abc/Img/photo.jpg"), b"IMAGE-BYTES");
}

// ---- Generation 4 ----

pub fn v4_fixture(root: &Path) {
    let table = format!("Msg_{}", talker_hash(ROOM));
    let schema = format!(
        "CREATE TABLE Name2Id (user_name TEXT); \
         CREATE TABLE {table} (local_id INTEGER PRIMARY KEY, server_id INTEGER, local_type INTEGER, \
         sort_seq INTEGER, real_sender_id INTEGER, create_time INTEGER, status INTEGER, \
         message_content BLOB, packed_info_data BLOB);"
    );
    let conn = create_db(&root.join("db_storage/message/message_0.db"), &schema);
    conn.execute_batch("INSERT INTO Name2Id VALUES ('wxid_friend'); INSERT INTO Name2Id VALUES ('wxid_self');")
        .unwrap();
    let compressed = zstd::encode_all(format!("{STRANGER}:\ncompressed hello").as_bytes(), 3).unwrap();
    conn.execute(
        &format!("INSERT INTO {table} VALUES (1, 11, 1, 1000, 1, 100, 4, 'plain text', NULL)"),
        [],
    )
    .unwrap();
    conn.execute(
        &format!("INSERT INTO {table} VALUES (2, 12, 1, 2000, 0, 200, 4, ?1, NULL)"),
        params![compressed],
    )
    .unwrap();

    // A second shard and an excluded full-text index
    let conn = create_db(&root.join("db_storage/message/message_1.db"), &schema);
    conn.execute(
        &format!("INSERT INTO {table} VALUES (1, 13, 1, 3000, 0, 300, 4, 'from shard one', NULL)"),
        [],
    )
    .unwrap();
    create_db(&root.join("db_storage/message/message_fts.db"), "CREATE TABLE junk (x INTEGER);");

    create_db(
        &root.join("db_storage/contact/contact.db"),
        "CREATE TABLE contact (username TEXT, alias TEXT, remark TEXT, nick_name TEXT, local_type INTEGER); \
         CREATE TABLE chat_room (username TEXT, owner TEXT, ext_buffer BLOB); \
         INSERT INTO contact VALUES ('wxid_friend', '', 'Bestie', 'Friend', 1); \
         INSERT INTO contact VALUES ('wxid_stranger', '', '', 'Someone', 3); \
         INSERT INTO contact VALUES ('123@chatroom', '', '', 'Team', 2); \
         INSERT INTO chat_room VALUES ('123@chatroom', 'wxid_friend', NULL);",
    );
    create_db(
        &root.join("db_storage/session/session.db"),
        "CREATE TABLE SessionTable (username TEXT, summary TEXT, last_timestamp INTEGER, sort_timestamp INTEGER); \
         INSERT INTO SessionTable VALUES ('123@chatroom', 'compressed hello', 300, 300); \
         INSERT INTO SessionTable VALUES ('wxid_friend', 'ok', 50, 50);",
    );
    create_db(
        &root.join("db_storage/hardlink/hardlink.db"),
        &format!(
            "CREATE TABLE dir2id (username TEXT); \
             CREATE TABLE image_hardlink_info_v3 (md5 TEXT, file_name TEXT, file_size INTEGER, dir1 INTEGER, dir2 INTEGER); \
             CREATE TABLE video_hardlink_info_v3 (md5 TEXT, file_name TEXT, file_size INTEGER, dir1 INTEGER, dir2 INTEGER); \
             CREATE TABLE file_hardlink_info_v3 (md5 TEXT, file_name TEXT, file_size INTEGER, dir1 INTEGER, dir2 INTEGER); \
             INSERT INTO dir2id VALUES ('roomhash'); \
             INSERT INTO dir2id VALUES ('2024-01'); \
             INSERT INTO image_hardlink_info_v3 VALUES ('{IMAGE_MD5}', 'photo.dat', 11, 1, 2);"
        ),
    );
    write_file(&root.join("msg/attach/roomhash/2024-01/Img/photo.dat"), b"IMAGE-BYTES");
    create_db(
        &root.join("db_storage/message/media_0.db"),
        &format!("CREATE TABLE VoiceInfo (svr_id INTEGER, voice_data BLOB); INSERT INTO VoiceInfo VALUES ({VOICE_ID}, X'534C4B');"),
    );
}

pub fn shard_path(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p))
}

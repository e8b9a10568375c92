//! Per-variant row fetchers.
//!
//! A [`DataSource`] knows which file groups a storage variant uses and how to read
//! one shard of each entity. It never fans out across shards; that is the job of
//! the repository. Each source owns the decoder of its variant.

pub mod darwin_v3;
pub mod v4;
pub mod windows_v3;

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{ChatlogError, Result};
use crate::models::{ChatRoom, Contact, Media, MediaKind, Message, Platform, Session, StorageVariant, TimeRange};
use crate::schema::{groups, is_safe_identifier, GroupSpec};

pub use darwin_v3::DarwinV3Source;
pub use v4::V4Source;
pub use windows_v3::WindowsV3Source;

/// Storage access for one variant
pub trait DataSource: Send + Sync {
    /// Variant served by this source
    fn variant(&self) -> StorageVariant;

    /// File groups to register with the connection cache
    fn groups(&self) -> &'static [GroupSpec];

    /// Group holding contacts
    fn contact_group(&self) -> &'static str {
        groups::CONTACT
    }

    /// Group holding chat rooms
    fn chat_room_group(&self) -> &'static str {
        groups::CONTACT
    }

    /// Group holding sessions
    fn session_group(&self) -> &'static str {
        groups::CONTACT
    }

    /// Group holding the lookup tables for a media kind, if supported
    fn media_group(&self, kind: MediaKind) -> Option<&'static str>;

    /// Messages of `talker` inside `range` from one shard, in storage order.
    /// A shard that holds nothing for the talker yields an empty list.
    fn messages(&self, conn: &Connection, talker: &str, range: &TimeRange) -> Result<Vec<Message>>;

    /// Contacts from one shard
    fn contacts(&self, conn: &Connection) -> Result<Vec<Contact>>;

    /// Chat rooms from one shard
    fn chat_rooms(&self, conn: &Connection) -> Result<Vec<ChatRoom>>;

    /// Sessions from one shard
    fn sessions(&self, conn: &Connection) -> Result<Vec<Session>>;

    /// Media blob for `key` from one shard
    fn media(&self, conn: &Connection, kind: MediaKind, key: &str) -> Result<Option<Media>>;
}

/// Build the source for a variant
pub fn for_variant(variant: StorageVariant, platform: Platform, data_dir: &Path) -> Box<dyn DataSource> {
    match variant {
        StorageVariant::WindowsV3 => Box::new(WindowsV3Source::new(data_dir)),
        StorageVariant::DarwinV3 => Box::new(DarwinV3Source::new(data_dir)),
        StorageVariant::V4 => Box::new(V4Source::new(data_dir, platform)),
    }
}

/// Column as bytes whatever its storage class; NULL is empty
pub(crate) fn bytes_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Vec::new(),
        ValueRef::Integer(i) => i.to_string().into_bytes(),
        ValueRef::Real(f) => f.to_string().into_bytes(),
        ValueRef::Text(t) | ValueRef::Blob(t) => t.to_vec(),
    })
}

/// Column as text whatever its storage class; NULL is empty
pub(crate) fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    bytes_at(row, idx).map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Column as integer; NULL and non-numeric text are 0
pub(crate) fn int_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => i,
        #[allow(clippy::cast_possible_truncation)]
        ValueRef::Real(f) => f as i64,
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(0),
        ValueRef::Null | ValueRef::Blob(_) => 0,
    })
}

/// Whether a table exists in this shard
pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Validate a computed table name before it is interpolated into SQL
pub(crate) fn checked_table(name: String) -> Result<String> {
    if is_safe_identifier(&name) {
        Ok(name)
    } else {
        Err(ChatlogError::InvalidInput(format!("invalid table name: {name}")))
    }
}

/// Join a stored relative path onto the data directory, accepting either separator
pub(crate) fn resolve(data_dir: &Path, rel: &str) -> PathBuf {
    rel.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(data_dir.to_path_buf(), |acc, part| acc.join(part))
}

/// Media record for a file under the data directory; bytes are read when present
pub(crate) fn media_from_file(data_dir: &Path, kind: MediaKind, key: &str, rel: String, name: String, size: i64) -> Media {
    let full = resolve(data_dir, &rel);
    let data = match fs::read(&full) {
        Ok(data) => data,
        Err(e) => {
            debug!(path = %full.display(), error = %e, "Media file not readable");
            Vec::new()
        }
    };
    let size = if size > 0 { size } else { i64::try_from(data.len()).unwrap_or(i64::MAX) };
    Media {
        kind,
        key: key.to_string(),
        path: rel,
        name,
        size,
        data,
    }
}

/// Content hashes are stored as raw 16-byte blobs in some tables
pub(crate) fn md5_blob(key: &str) -> Result<Vec<u8>> {
    hex::decode(key).map_err(|e| ChatlogError::InvalidInput(format!("invalid media key {key}: {e}")))
}

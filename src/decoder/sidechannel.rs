//! Side-channel metadata blobs.
//!
//! Both schema generations attach a small protobuf-encoded blob to message rows.
//! Only a handful of fields matter, so instead of generated bindings this module
//! carries a wire-format reader and flattens what it finds into `tag → string`.
//! Unknown fields are skipped; any framing error discards the whole blob.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::ChatRoomUser;

/// Flattened side-channel attributes
pub type SideChannel = BTreeMap<u32, String>;

/// Tags of the flattened map
pub mod tags {
    /// Generation 3: real sender inside a chat room
    pub const SENDER: u32 = 1;
    /// Generation 3: thumbnail path
    pub const THUMB_PATH: u32 = 3;
    /// Generation 3: media path
    pub const MEDIA_PATH: u32 = 4;
    /// Generation 4: image content hash
    pub const IMAGE_MD5: u32 = 3;
    /// Generation 4: video content hash
    pub const VIDEO_MD5: u32 = 4;
}

/// Malformed blob
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended inside a field
    #[error("truncated at byte {0}")]
    Truncated(usize),
    /// Varint longer than ten bytes
    #[error("varint overflow at byte {0}")]
    VarintOverflow(usize),
    /// Wire type 3/4/6/7
    #[error("unsupported wire type {0}")]
    WireType(u8),
}

/// One field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireValue<'a> {
    /// Wire type 0
    Varint(u64),
    /// Wire type 1
    Fixed64(u64),
    /// Wire type 2
    Bytes(&'a [u8]),
    /// Wire type 5
    Fixed32(u32),
}

/// Sequential reader over protobuf wire format
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Reader over `buf`
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(WireError::Truncated(self.pos));
            };
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(WireError::VarintOverflow(self.pos));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow(self.pos))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated(self.pos))?;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    /// Next `(field number, value)`, or `None` at the end of input
    pub fn next_field(&mut self) -> Result<Option<(u32, WireValue<'a>)>, WireError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| WireError::VarintOverflow(self.pos))?;
        let value = match (key & 0x7) as u8 {
            0 => WireValue::Varint(self.varint()?),
            1 => {
                let bytes = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                WireValue::Fixed64(u64::from_le_bytes(raw))
            }
            2 => {
                let len = usize::try_from(self.varint()?).map_err(|_| WireError::Truncated(self.pos))?;
                WireValue::Bytes(self.take(len)?)
            }
            5 => {
                let bytes = self.take(4)?;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                WireValue::Fixed32(u32::from_le_bytes(raw))
            }
            other => return Err(WireError::WireType(other)),
        };
        Ok(Some((field, value)))
    }

    /// Collect every field
    pub fn fields(mut self) -> Result<Vec<(u32, WireValue<'a>)>, WireError> {
        let mut out = Vec::new();
        while let Some(field) = self.next_field()? {
            out.push(field);
        }
        Ok(out)
    }
}

fn string_field(bytes: &[u8], wanted: u32) -> Result<Option<String>, WireError> {
    let mut found = None;
    for (field, value) in WireReader::new(bytes).fields()? {
        if let (true, WireValue::Bytes(b)) = (field == wanted, value) {
            found = Some(String::from_utf8_lossy(b).into_owned());
        }
    }
    Ok(found)
}

/// Generation 3 extra bytes: repeated field 3 of `{1: tag, 2: value}`
pub fn parse_extra(bytes: &[u8]) -> Result<SideChannel, WireError> {
    let mut map = SideChannel::new();
    for (field, value) in WireReader::new(bytes).fields()? {
        let (3, WireValue::Bytes(item)) = (field, value) else {
            continue;
        };
        let mut tag = None;
        let mut text = None;
        for (f, v) in WireReader::new(item).fields()? {
            match (f, v) {
                (1, WireValue::Varint(t)) => tag = u32::try_from(t).ok(),
                (2, WireValue::Bytes(s)) => text = Some(String::from_utf8_lossy(s).into_owned()),
                _ => {}
            }
        }
        if let (Some(tag), Some(text)) = (tag, text) {
            map.insert(tag, text);
        }
    }
    Ok(map)
}

/// Generation 4 packed info: field 3 `{4: image md5}`, field 4 `{8: video md5}`
pub fn parse_packed_info(bytes: &[u8]) -> Result<SideChannel, WireError> {
    let mut map = SideChannel::new();
    for (field, value) in WireReader::new(bytes).fields()? {
        let WireValue::Bytes(inner) = value else {
            continue;
        };
        let found = match field {
            3 => string_field(inner, 4)?.map(|md5| (tags::IMAGE_MD5, md5)),
            4 => string_field(inner, 8)?.map(|md5| (tags::VIDEO_MD5, md5)),
            _ => None,
        };
        if let Some((tag, md5)) = found.filter(|(_, md5)| !md5.is_empty()) {
            map.insert(tag, md5);
        }
    }
    Ok(map)
}

/// Chat room member list: repeated field 1 of `{1: user name, 2: display name}`
pub fn parse_room_members(bytes: &[u8]) -> Result<Vec<ChatRoomUser>, WireError> {
    let mut users = Vec::new();
    for (field, value) in WireReader::new(bytes).fields()? {
        let (1, WireValue::Bytes(member)) = (field, value) else {
            continue;
        };
        let mut user = ChatRoomUser::default();
        for (f, v) in WireReader::new(member).fields()? {
            match (f, v) {
                (1, WireValue::Bytes(s)) => user.user_name = String::from_utf8_lossy(s).into_owned(),
                (2, WireValue::Bytes(s)) => user.display_name = String::from_utf8_lossy(s).into_owned(),
                _ => {}
            }
        }
        if !user.user_name.is_empty() {
            users.push(user);
        }
    }
    Ok(users)
}

#[cfg(test)]
pub(crate) mod encode {
    //! Minimal encoder used to build fixtures

    pub(crate) fn varint(mut v: u64, out: &mut Vec<u8>) {
        while v >= 0x80 {
            out.push((v as u8) | 0x80);
            v >>= 7;
        }
        out.push(v as u8);
    }

    pub(crate) fn bytes_field(field: u32, data: &[u8], out: &mut Vec<u8>) {
        varint(u64::from(field) << 3 | 2, out);
        varint(data.len() as u64, out);
        out.extend_from_slice(data);
    }

    pub(crate) fn varint_field(field: u32, v: u64, out: &mut Vec<u8>) {
        varint(u64::from(field) << 3, out);
        varint(v, out);
    }

    pub(crate) fn extra(items: &[(u64, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        // header message the real blobs carry first
        bytes_field(1, &[0x08, 0x00], &mut out);
        for (tag, value) in items {
            let mut item = Vec::new();
            varint_field(1, *tag, &mut item);
            bytes_field(2, value.as_bytes(), &mut item);
            bytes_field(3, &item, &mut out);
        }
        out
    }
}

//! Record encodings shared by the writer and the read path.
//!
//! ## Data record (`sst-<id>.data`)
//!
//! ```text
//! [body_len: u32][crc32(body): u32][body]
//! body = [key_len: u32][key][seq: u64][flags: u8][val_len: u32][value]
//! ```
//!
//! `flags` bit 0 marks a tombstone, which carries `val_len = 0` and no
//! value bytes.
//!
//! ## Index record (`sst-<id>.index`)
//!
//! ```text
//! [body_len: u32][data_offset: u64][key]
//! ```
//!
//! All integers are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memtable::ValueEntry;

/// Maximum key size we'll accept while decoding (64 KiB). Prevents OOM on corrupt files.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll accept while decoding (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// `body_len` + `crc32`.
pub const RECORD_HEADER_BYTES: usize = 4 + 4;

const FLAG_TOMBSTONE: u8 = 0x01;

/// Fixed part of a data record body: key_len + seq + flags + val_len.
const BODY_FIXED_BYTES: usize = 4 + 8 + 1 + 4;

pub fn data_file_name(id: u64) -> String {
    format!("sst-{}.data", id)
}

pub fn index_file_name(id: u64) -> String {
    format!("sst-{}.index", id)
}

pub fn bloom_file_name(id: u64) -> String {
    format!("sst-{}.bloom", id)
}

/// Parses `sst-<id>.<ext>` into `(id, ext)` for one of the three table files.
pub fn parse_file_name(name: &str) -> Option<(u64, &str)> {
    let rest = name.strip_prefix("sst-")?;
    let (id, ext) = rest.split_once('.')?;
    match ext {
        "data" | "index" | "bloom" => Some((id.parse().ok()?, ext)),
        _ => None,
    }
}

/// Appends one encoded data record to `out`.
pub fn encode_record(out: &mut Vec<u8>, key: &[u8], entry: &ValueEntry) {
    let value = entry.value.as_deref().unwrap_or_default();
    let body_len = BODY_FIXED_BYTES + key.len() + value.len();

    let start = out.len();
    out.reserve(RECORD_HEADER_BYTES + body_len);
    // Writes into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(body_len as u32);
    let _ = out.write_u32::<LittleEndian>(0); // crc placeholder

    let body_start = out.len();
    let _ = out.write_u32::<LittleEndian>(key.len() as u32);
    out.extend_from_slice(key);
    let _ = out.write_u64::<LittleEndian>(entry.seq);
    let flags = if entry.is_tombstone() { FLAG_TOMBSTONE } else { 0 };
    let _ = out.write_u8(flags);
    let _ = out.write_u32::<LittleEndian>(value.len() as u32);
    out.extend_from_slice(value);

    let crc = crc32fast::hash(&out[body_start..]);
    out[start + 4..start + 8].copy_from_slice(&crc.to_le_bytes());
}

/// Sequential decoder over a byte range of a data file.
///
/// Errors are returned as plain reasons; the caller attaches the table path.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next record relative to the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decodes the next record, or `None` at the end of the buffer.
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>, String> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let rest = &self.buf[self.pos..];
        if rest.len() < RECORD_HEADER_BYTES {
            return Err(format!("truncated record header at +{}", self.pos));
        }

        let mut header = &rest[..RECORD_HEADER_BYTES];
        let body_len = read_u32(&mut header)? as usize;
        let expected_crc = read_u32(&mut header)?;

        if body_len < BODY_FIXED_BYTES || body_len > BODY_FIXED_BYTES + MAX_KEY_BYTES + MAX_VALUE_BYTES {
            return Err(format!("invalid record length {} at +{}", body_len, self.pos));
        }
        let body = rest
            .get(RECORD_HEADER_BYTES..RECORD_HEADER_BYTES + body_len)
            .ok_or_else(|| format!("truncated record body at +{}", self.pos))?;

        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            return Err(format!(
                "record checksum mismatch at +{}: expected {:#010x}, got {:#010x}",
                self.pos, expected_crc, actual_crc
            ));
        }

        let mut cur = body;
        let key_len = read_u32(&mut cur)? as usize;
        if key_len > MAX_KEY_BYTES || key_len > cur.len() {
            return Err(format!("invalid key length {} at +{}", key_len, self.pos));
        }
        let key = cur[..key_len].to_vec();
        cur = &cur[key_len..];

        let seq = cur
            .read_u64::<LittleEndian>()
            .map_err(|_| format!("truncated sequence at +{}", self.pos))?;
        let flags = cur
            .read_u8()
            .map_err(|_| format!("truncated flags at +{}", self.pos))?;
        let val_len = read_u32(&mut cur)? as usize;
        if val_len != cur.len() {
            return Err(format!(
                "value length {} does not match record body at +{}",
                val_len, self.pos
            ));
        }

        let value = if flags & FLAG_TOMBSTONE != 0 {
            if val_len != 0 {
                return Err(format!("tombstone with value at +{}", self.pos));
            }
            None
        } else {
            Some(cur.to_vec())
        };

        self.pos += RECORD_HEADER_BYTES + body_len;
        Ok(Some((key, ValueEntry { seq, value })))
    }
}

/// Appends one encoded index record to `out`.
pub fn encode_index_record(out: &mut Vec<u8>, key: &[u8], offset: u64) {
    let _ = out.write_u32::<LittleEndian>((8 + key.len()) as u32);
    let _ = out.write_u64::<LittleEndian>(offset);
    out.extend_from_slice(key);
}

/// Decodes every index record in `buf`.
pub fn decode_index_records(buf: &[u8]) -> Result<Vec<(Vec<u8>, u64)>, String> {
    let mut out = Vec::new();
    let mut cur = buf;
    while !cur.is_empty() {
        let body_len = read_u32(&mut cur)? as usize;
        if body_len < 8 || body_len - 8 > MAX_KEY_BYTES || body_len > cur.len() {
            return Err(format!("invalid index record length {}", body_len));
        }
        let (body, rest) = cur.split_at(body_len);
        let offset = u64::from_le_bytes(
            body[..8]
                .try_into()
                .map_err(|_| "truncated index offset".to_string())?,
        );
        out.push((body[8..].to_vec(), offset));
        cur = rest;
    }
    Ok(out)
}

fn read_u32(cur: &mut &[u8]) -> Result<u32, String> {
    cur.read_u32::<LittleEndian>()
        .map_err(|_| "truncated length field".to_string())
}

//! Dictionary compression for categorical (string) columns.
//!
//! ```text
//! [entries: u16 BE] ([len: u16 BE][bytes])* [run-length coded u16 ids]
//! ```
//!
//! Ids are assigned in first-seen order. At most 65,535 distinct strings of
//! at most 65,535 bytes each can be encoded. The element count is implied by
//! the id runs.

use std::collections::HashMap;

use crate::codec::primitives::{write_short_string, ByteReader, MAX_SHORT_STRING};
use crate::codec::rle::{decode_runs, encode_runs};
use crate::codec::{unsupported, Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::{EdgeError, Result};

/// Maximum number of distinct dictionary entries.
pub const MAX_ENTRIES: usize = u16::MAX as usize;

/// String dictionary codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryCodec;

/// Builds the dictionary and id sequence for `values`.
pub fn build_dictionary(values: &[String]) -> Result<(Vec<&str>, Vec<u16>)> {
    let mut ids: HashMap<&str, u16> = HashMap::new();
    let mut entries: Vec<&str> = Vec::new();
    let mut sequence = Vec::with_capacity(values.len());

    for value in values {
        let id = match ids.get(value.as_str()) {
            Some(&id) => id,
            None => {
                if entries.len() >= MAX_ENTRIES {
                    return Err(EdgeError::LimitExceeded(format!(
                        "more than {} distinct dictionary entries",
                        MAX_ENTRIES
                    )));
                }
                if value.len() > MAX_SHORT_STRING {
                    return Err(EdgeError::LimitExceeded(format!(
                        "dictionary entry of {} bytes exceeds {} bytes",
                        value.len(),
                        MAX_SHORT_STRING
                    )));
                }
                let id = entries.len() as u16;
                ids.insert(value.as_str(), id);
                entries.push(value.as_str());
                id
            }
        };
        sequence.push(id);
    }
    Ok((entries, sequence))
}

/// Encodes a string column.
pub fn encode_strings(values: &[String]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let (entries, sequence) = build_dictionary(values)?;

    let mut buf = Vec::new();
    buf.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for entry in &entries {
        write_short_string(&mut buf, entry)?;
    }
    buf.extend_from_slice(&encode_runs(&sequence)?);
    Ok(buf)
}

/// Decodes a string column.
pub fn decode_strings(data: &[u8]) -> Result<Vec<String>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let entry_count = reader.read_u16_be()? as usize;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        entries.push(reader.read_short_string()?);
    }

    let sequence: Vec<u16> = decode_runs(reader.rest())?;
    sequence
        .into_iter()
        .map(|id| {
            entries.get(id as usize).cloned().ok_or_else(|| {
                EdgeError::Corrupted(format!(
                    "dictionary id {} out of range ({} entries)",
                    id, entry_count
                ))
            })
        })
        .collect()
}

impl ValueCodec for DictionaryCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::Dictionary
    }

    fn supports(&self, column_type: ColumnType) -> bool {
        column_type == ColumnType::String
    }

    fn encode(&self, column: &Column) -> Result<Vec<u8>> {
        match column {
            Column::String(v) => encode_strings(v),
            other => Err(unsupported(self.kind(), other.column_type())),
        }
    }

    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column> {
        match column_type {
            ColumnType::String => Ok(Column::String(decode_strings(data)?)),
            other => Err(unsupported(self.kind(), other)),
        }
    }
}

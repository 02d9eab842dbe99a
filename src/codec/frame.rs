//! Block frame: a timestamp column and a value column in one payload.
//!
//! ```text
//! [ts_len: u32 BE][val_len: u32 BE][timestamps][values]
//! ```

use crate::codec::primitives::ByteReader;
use crate::error::{EdgeError, Result};

/// Size of the frame header.
pub const HEADER_LEN: usize = 8;

fn section_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| EdgeError::LimitExceeded(format!("{} section of {} bytes", what, len)))
}

/// Joins encoded timestamps and values.
pub fn combine(timestamps: &[u8], values: &[u8]) -> Result<Vec<u8>> {
    let ts_len = section_len(timestamps.len(), "timestamp")?;
    let val_len = section_len(values.len(), "value")?;

    let mut frame = Vec::with_capacity(HEADER_LEN + timestamps.len() + values.len());
    frame.extend_from_slice(&ts_len.to_be_bytes());
    frame.extend_from_slice(&val_len.to_be_bytes());
    frame.extend_from_slice(timestamps);
    frame.extend_from_slice(values);
    Ok(frame)
}

/// Splits a frame into its timestamp and value sections.
pub fn separate(frame: &[u8]) -> Result<(&[u8], &[u8])> {
    if frame.len() < HEADER_LEN {
        return Err(EdgeError::InsufficientData(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }
    let mut reader = ByteReader::new(frame);
    let ts_len = reader.read_u32_be()? as usize;
    let val_len = reader.read_u32_be()? as usize;

    if ts_len.saturating_add(val_len) != reader.remaining() {
        return Err(EdgeError::Corrupted(format!(
            "frame declares {} + {} bytes but carries {}",
            ts_len,
            val_len,
            reader.remaining()
        )));
    }
    let timestamps = reader.take(ts_len)?;
    let values = reader.take(val_len)?;
    Ok((timestamps, values))
}

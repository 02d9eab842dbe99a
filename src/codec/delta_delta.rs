//! Delta-of-delta compression.
//!
//! # Float columns
//!
//! ```text
//! [count: u32 BE][v0: f64 BE][d1: f32 BE][dd2: f32 BE]...[ddn: f32 BE]
//! ```
//!
//! The first value is stored exactly. The first delta and every following
//! delta-of-delta are narrowed to `f32`. The encoder tracks the values the
//! decoder will reconstruct, so rounding error does not accumulate along
//! the column: every element is within one `f32` rounding step of its
//! input. Linear trends collapse to delta-of-delta values near zero, which
//! the block codec then compresses well.
//!
//! # Integer columns
//!
//! Integer columns (timestamps) are lossless. After the count, a bit stream
//! holds the first value raw and then each delta-of-delta in a variable
//! width bucket:
//!
//! - `0`: `'0'` (1 bit)
//! - `[-63, 64]`: `'10'` + 7 bits
//! - `[-255, 256]`: `'110'` + 9 bits
//! - `[-2047, 2048]`: `'1110'` + 12 bits
//! - else: `'1111'` + 64 bits

use crate::codec::bits::{BitReader, BitWriter};
use crate::codec::primitives::{f32_to_bits, write_count, ByteReader};
use crate::codec::{unsupported, Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::{EdgeError, Result};

/// Second-order difference codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaDeltaCodec;

/// Encodes a float column.
pub fn encode_f64(values: &[f64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::with_capacity(4 + 8 + (values.len() - 1) * 4);
    write_count(&mut buf, values.len())?;
    buf.extend_from_slice(&values[0].to_bits().to_be_bytes());

    let mut prev_value = values[0];
    let mut prev_delta = 0.0f64;
    for (i, &value) in values.iter().enumerate().skip(1) {
        let delta = value - prev_value;
        let stored = if i == 1 {
            delta as f32
        } else {
            (delta - prev_delta) as f32
        };
        buf.extend_from_slice(&f32_to_bits(stored).to_be_bytes());

        // Mirror the decoder
        prev_delta = if i == 1 {
            f64::from(stored)
        } else {
            prev_delta + f64::from(stored)
        };
        prev_value += prev_delta;
    }
    Ok(buf)
}

/// Decodes a float column.
pub fn decode_f64(data: &[u8]) -> Result<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let count = reader.read_count()?;
    if count == 0 {
        reader.finish("empty delta-delta column")?;
        return Ok(Vec::new());
    }
    let expected = 8 + (count - 1).saturating_mul(4);
    if reader.remaining() < expected {
        return Err(EdgeError::InsufficientData(format!(
            "delta-delta column of {} values needs {} bytes, {} remaining",
            count,
            expected,
            reader.remaining()
        )));
    }

    let mut values = Vec::with_capacity(count);
    let mut prev_value = reader.read_f64_be()?;
    values.push(prev_value);

    let mut prev_delta = 0.0f64;
    for i in 1..count {
        let stored = f64::from(reader.read_f32_be()?);
        prev_delta = if i == 1 { stored } else { prev_delta + stored };
        prev_value += prev_delta;
        values.push(prev_value);
    }
    reader.finish("delta-delta column")?;
    Ok(values)
}

/// Encodes an integer column losslessly.
pub fn encode_i64(values: &[i64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::with_capacity(4 + 8 + values.len() / 4);
    write_count(&mut buf, values.len())?;

    let mut writer = BitWriter::new();
    writer.write_bits(values[0] as u64, 64);

    let mut prev = values[0];
    let mut prev_delta: i64 = 0;
    for &value in &values[1..] {
        let delta = value.wrapping_sub(prev);
        let dod = delta.wrapping_sub(prev_delta);

        if dod == 0 {
            writer.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            writer.write_bits(0b10, 2);
            writer.write_bits((dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            writer.write_bits(0b110, 3);
            writer.write_bits((dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            writer.write_bits(0b1110, 4);
            writer.write_bits((dod + 2047) as u64, 12);
        } else {
            writer.write_bits(0b1111, 4);
            writer.write_bits(dod as u64, 64);
        }

        prev_delta = delta;
        prev = value;
    }

    buf.extend_from_slice(&writer.into_bytes());
    Ok(buf)
}

/// Decodes an integer column.
pub fn decode_i64(data: &[u8]) -> Result<Vec<i64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let count = reader.read_count()?;
    if count == 0 {
        reader.finish("empty delta-delta column")?;
        return Ok(Vec::new());
    }

    let mut bits = BitReader::new(reader.rest());
    // Each value after the first costs at least one bit
    if bits.remaining() < 64 + (count - 1) {
        return Err(EdgeError::InsufficientData(format!(
            "bit stream too short for {} values",
            count
        )));
    }

    let mut values = Vec::with_capacity(count);
    let mut prev = bits.read_bits(64)? as i64;
    values.push(prev);

    let mut prev_delta: i64 = 0;
    for _ in 1..count {
        let dod = if !bits.read_bit()? {
            0
        } else if !bits.read_bit()? {
            bits.read_bits(7)? as i64 - 63
        } else if !bits.read_bit()? {
            bits.read_bits(9)? as i64 - 255
        } else if !bits.read_bit()? {
            bits.read_bits(12)? as i64 - 2047
        } else {
            bits.read_bits(64)? as i64
        };

        let delta = prev_delta.wrapping_add(dod);
        prev = prev.wrapping_add(delta);
        prev_delta = delta;
        values.push(prev);
    }
    Ok(values)
}

impl ValueCodec for DeltaDeltaCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::DeltaDelta
    }

    fn supports(&self, column_type: ColumnType) -> bool {
        matches!(column_type, ColumnType::Int64 | ColumnType::Float64)
    }

    fn encode(&self, column: &Column) -> Result<Vec<u8>> {
        match column {
            Column::Int64(v) => encode_i64(v),
            Column::Float64(v) => encode_f64(v),
            other => Err(unsupported(self.kind(), other.column_type())),
        }
    }

    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column> {
        match column_type {
            ColumnType::Int64 => Ok(Column::Int64(decode_i64(data)?)),
            ColumnType::Float64 => Ok(Column::Float64(decode_f64(data)?)),
            other => Err(unsupported(self.kind(), other)),
        }
    }
}

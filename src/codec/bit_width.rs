//! Bit-width packing for small-range numeric columns.
//!
//! The column is scanned once to pick the narrowest representation:
//!
//! | flag   | values                          | width   |
//! |--------|---------------------------------|---------|
//! | `0x01` | integral, `[0, 255]`            | 1 byte  |
//! | `0x02` | integral, `[-32768, 32767]`     | 2 bytes |
//! | `0x04` | integral, `i32` range           | 4 bytes |
//! | `0x08` | anything else (float columns)   | 4 bytes, `f32` |
//!
//! Layout: `[count: u32 BE][flag: u8][value]*`. Suited to enumerated and
//! state-like series. The `f32` fallback is lossy; integer columns never
//! use it and reject values outside the `i32` range instead.

use crate::codec::primitives::{f32_to_bits, write_count, ByteReader};
use crate::codec::{unsupported, Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::{EdgeError, Result};

/// One unsigned byte per value.
pub const FLAG_U8: u8 = 0x01;
/// Two-byte signed values.
pub const FLAG_I16: u8 = 0x02;
/// Four-byte signed values.
pub const FLAG_I32: u8 = 0x04;
/// Four-byte float fallback.
pub const FLAG_F32: u8 = 0x08;

/// Narrowest-fixed-width codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitWidthCodec;

fn flag_for_range(min: i64, max: i64) -> Option<u8> {
    if min >= 0 && max <= u8::MAX as i64 {
        Some(FLAG_U8)
    } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
        Some(FLAG_I16)
    } else if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
        Some(FLAG_I32)
    } else {
        None
    }
}

/// Integral and sign-preserving when converted through `i64`.
fn as_exact_integer(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 || (value == 0.0 && value.is_sign_negative()) {
        return None;
    }
    if value < i32::MIN as f64 || value > i32::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

/// Returns the flag the encoder would choose for a float column.
pub fn classify_f64(values: &[f64]) -> u8 {
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    for &value in values {
        match as_exact_integer(value) {
            Some(v) => {
                min = min.min(v);
                max = max.max(v);
            }
            None => return FLAG_F32,
        }
    }
    flag_for_range(min, max).unwrap_or(FLAG_F32)
}

fn write_integers(buf: &mut Vec<u8>, flag: u8, values: impl Iterator<Item = i64>) {
    for v in values {
        match flag {
            FLAG_U8 => buf.push(v as u8),
            FLAG_I16 => buf.extend_from_slice(&(v as i16).to_be_bytes()),
            _ => buf.extend_from_slice(&(v as i32).to_be_bytes()),
        }
    }
}

fn value_width(flag: u8) -> Result<usize> {
    match flag {
        FLAG_U8 => Ok(1),
        FLAG_I16 => Ok(2),
        FLAG_I32 | FLAG_F32 => Ok(4),
        other => Err(EdgeError::UnsupportedFormat(format!(
            "unknown bit-width flag {:#04x}",
            other
        ))),
    }
}

/// Reads the header and checks the payload holds `count` values.
fn read_header(reader: &mut ByteReader<'_>) -> Result<(usize, u8)> {
    let count = reader.read_count()?;
    let flag = reader.read_u8()?;
    let width = value_width(flag)?;
    if reader.remaining() != count.saturating_mul(width) {
        return Err(EdgeError::Corrupted(format!(
            "bit-width payload of {} bytes does not hold {} values of {} bytes",
            reader.remaining(),
            count,
            width
        )));
    }
    Ok((count, flag))
}

fn read_integer(reader: &mut ByteReader<'_>, flag: u8) -> Result<i64> {
    match flag {
        FLAG_U8 => Ok(reader.read_u8()? as i64),
        FLAG_I16 => Ok(reader.read_i16_be()? as i64),
        _ => Ok(reader.read_i32_be()? as i64),
    }
}

/// Encodes a float column.
pub fn encode_f64(values: &[f64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let flag = classify_f64(values);
    let mut buf = Vec::with_capacity(5 + values.len() * value_width(flag)?);
    write_count(&mut buf, values.len())?;
    buf.push(flag);
    if flag == FLAG_F32 {
        for &v in values {
            buf.extend_from_slice(&f32_to_bits(v as f32).to_be_bytes());
        }
    } else {
        write_integers(&mut buf, flag, values.iter().map(|&v| v as i64));
    }
    Ok(buf)
}

/// Decodes a float column.
pub fn decode_f64(data: &[u8]) -> Result<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let (count, flag) = read_header(&mut reader)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let v = if flag == FLAG_F32 {
            f64::from(reader.read_f32_be()?)
        } else {
            read_integer(&mut reader, flag)? as f64
        };
        values.push(v);
    }
    Ok(values)
}

/// Encodes an integer column; values must fit in `i32`.
pub fn encode_i64(values: &[i64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    let flag = flag_for_range(min, max).ok_or_else(|| {
        EdgeError::LimitExceeded(format!(
            "integer range [{}, {}] does not fit bit-width packing",
            min, max
        ))
    })?;
    let mut buf = Vec::with_capacity(5 + values.len() * value_width(flag)?);
    write_count(&mut buf, values.len())?;
    buf.push(flag);
    write_integers(&mut buf, flag, values.iter().copied());
    Ok(buf)
}

/// Decodes an integer column.
pub fn decode_i64(data: &[u8]) -> Result<Vec<i64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let (count, flag) = read_header(&mut reader)?;
    if flag == FLAG_F32 {
        return Err(EdgeError::UnsupportedFormat(
            "float bit-width payload in an integer column".to_string(),
        ));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_integer(&mut reader, flag)?);
    }
    Ok(values)
}

impl ValueCodec for BitWidthCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::BitWidth
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

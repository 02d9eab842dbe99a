//! Gorilla XOR compression for float columns.
//!
//! The stream is bit-level and carries its own count:
//!
//! - 32 bits: number of values
//! - 64 bits: first value (IEEE 754)
//! - per subsequent value, XOR against the previous value:
//!   - XOR = 0: `'0'`
//!   - fits the previous window: `'10'` + meaningful bits
//!   - new window: `'11'` + 5 bits leading zeros + 6 bits length + meaningful bits
//!
//! Leading zeros above 31 are clamped to 31 (the window widens to match),
//! and a 64-bit meaningful length is written as 0. The window is only
//! replaced by `'11'` codings. Round trips are bit-identical, including
//! `NaN` payloads and signed zeros.

use crate::codec::bits::{BitReader, BitWriter};
use crate::codec::{unsupported, Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::{EdgeError, Result};

/// Largest leading-zero count representable in the 5-bit field.
const MAX_LEADING: u32 = 31;

/// XOR float codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorCodec;

/// Streaming encoder for XOR-compressed floats.
#[derive(Debug, Default)]
pub struct XorEncoder {
    prev_value: Option<u64>,
    // (leading, trailing) of the current window
    window: Option<(u32, u32)>,
}

impl XorEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value to `output`.
    pub fn encode(&mut self, value: f64, output: &mut BitWriter) {
        let bits = value.to_bits();

        let prev = match self.prev_value {
            None => {
                self.prev_value = Some(bits);
                output.write_bits(bits, 64);
                return;
            }
            Some(prev) => prev,
        };

        let xor = bits ^ prev;
        self.prev_value = Some(bits);

        if xor == 0 {
            output.write_bit(false);
            return;
        }
        output.write_bit(true);

        let leading = xor.leading_zeros().min(MAX_LEADING);
        let trailing = xor.trailing_zeros();

        match self.window {
            Some((prev_leading, prev_trailing))
                if leading >= prev_leading && trailing >= prev_trailing =>
            {
                output.write_bit(false);
                let meaningful = 64 - prev_leading - prev_trailing;
                output.write_bits(xor >> prev_trailing, meaningful);
            }
            _ => {
                output.write_bit(true);
                let meaningful = 64 - leading - trailing;
                output.write_bits(leading as u64, 5);
                // 64 does not fit in 6 bits and is written as 0
                output.write_bits((meaningful & 0x3F) as u64, 6);
                output.write_bits(xor >> trailing, meaningful);
                self.window = Some((leading, trailing));
            }
        }
    }
}

/// Streaming decoder for XOR-compressed floats.
pub struct XorDecoder<'a> {
    reader: BitReader<'a>,
    prev_value: Option<u64>,
    window: Option<(u32, u32)>,
}

impl<'a> XorDecoder<'a> {
    /// Creates a decoder over a bit reader positioned at the first value.
    pub fn new(reader: BitReader<'a>) -> Self {
        Self {
            reader,
            prev_value: None,
            window: None,
        }
    }

    /// Decodes the next value.
    pub fn decode_next(&mut self) -> Result<f64> {
        let prev = match self.prev_value {
            None => {
                let bits = self.reader.read_bits(64)?;
                self.prev_value = Some(bits);
                return Ok(f64::from_bits(bits));
            }
            Some(prev) => prev,
        };

        if !self.reader.read_bit()? {
            return Ok(f64::from_bits(prev));
        }

        let xor = if !self.reader.read_bit()? {
            let (leading, trailing) = self.window.ok_or_else(|| {
                EdgeError::Corrupted("window reuse before any window was set".to_string())
            })?;
            let meaningful = 64 - leading - trailing;
            self.reader.read_bits(meaningful)? << trailing
        } else {
            let leading = self.reader.read_bits(5)? as u32;
            let meaningful = match self.reader.read_bits(6)? as u32 {
                0 => 64,
                n => n,
            };
            if leading + meaningful > 64 {
                return Err(EdgeError::Corrupted(format!(
                    "window of {} leading and {} meaningful bits exceeds 64",
                    leading, meaningful
                )));
            }
            let trailing = 64 - leading - meaningful;
            self.window = Some((leading, trailing));
            self.reader.read_bits(meaningful)? << trailing
        };

        let bits = prev ^ xor;
        self.prev_value = Some(bits);
        Ok(f64::from_bits(bits))
    }
}

/// Encodes a float column.
pub fn encode_f64(values: &[f64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let count = u32::try_from(values.len()).map_err(|_| {
        EdgeError::LimitExceeded(format!("{} elements exceed u32 count", values.len()))
    })?;

    let mut writer = BitWriter::new();
    writer.write_bits(count as u64, 32);
    let mut encoder = XorEncoder::new();
    for &value in values {
        encoder.encode(value, &mut writer);
    }
    Ok(writer.into_bytes())
}

/// Decodes a float column.
pub fn decode_f64(data: &[u8]) -> Result<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = BitReader::new(data);
    let count = reader.read_bits(32)? as usize;
    if count > 0 && reader.remaining() < 64 + (count - 1) {
        return Err(EdgeError::InsufficientData(format!(
            "bit stream too short for {} values",
            count
        )));
    }

    let mut decoder = XorDecoder::new(reader);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decoder.decode_next()?);
    }
    Ok(values)
}

impl ValueCodec for XorCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::Xor
    }

    fn supports(&self, column_type: ColumnType) -> bool {
        column_type == ColumnType::Float64
    }

    fn encode(&self, column: &Column) -> Result<Vec<u8>> {
        match column {
            Column::Float64(v) => encode_f64(v),
            other => Err(unsupported(self.kind(), other.column_type())),
        }
    }

    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column> {
        match column_type {
            ColumnType::Float64 => Ok(Column::Float64(decode_f64(data)?)),
            other => Err(unsupported(self.kind(), other)),
        }
    }
}

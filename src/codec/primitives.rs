//! Fixed-width numeric encoding primitives shared by the codecs.
//!
//! Codec payloads are big-endian. The little-endian readers exist for the
//! write-ahead log, which frames its records in little-endian like the
//! segment headers it shares with the rest of the store.

use crate::error::{EdgeError, Result};

/// Maximum length of a u16-prefixed string.
pub const MAX_SHORT_STRING: usize = u16::MAX as usize;

/// Reinterprets an `f32` as its IEEE 754 bit pattern.
#[inline]
pub fn f32_to_bits(value: f32) -> u32 {
    value.to_bits()
}

/// Rebuilds an `f32` from its IEEE 754 bit pattern.
#[inline]
pub fn f32_from_bits(bits: u32) -> f32 {
    f32::from_bits(bits)
}

/// Appends a 4-byte big-endian element count.
pub fn write_count(buf: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| EdgeError::LimitExceeded(format!("{} elements exceed u32 count", count)))?;
    buf.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

/// Appends a u16 big-endian length followed by the string bytes.
pub fn write_short_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.len() > MAX_SHORT_STRING {
        return Err(EdgeError::LimitExceeded(format!(
            "string of {} bytes exceeds {} bytes",
            value.len(),
            MAX_SHORT_STRING
        )));
    }
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Cursor over a byte slice whose reads fail instead of panicking.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the unread tail without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Consumes and returns the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(EdgeError::InsufficientData(format!(
                "need {} bytes at offset {}, {} remaining",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    /// Reads a big-endian u16.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian i16.
    pub fn read_i16_be(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian u32.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian i32.
    pub fn read_i32_be(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian i64.
    pub fn read_i64_be(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian u64.
    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Reads a big-endian f32.
    pub fn read_f32_be(&mut self) -> Result<f32> {
        Ok(f32_from_bits(self.read_u32_be()?))
    }

    /// Reads a big-endian f64.
    pub fn read_f64_be(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64_be()?))
    }

    /// Reads a little-endian u16.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian i64.
    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Reads a 4-byte big-endian element count.
    pub fn read_count(&mut self) -> Result<usize> {
        Ok(self.read_u32_be()? as usize)
    }

    /// Reads a u16-length-prefixed UTF-8 string.
    pub fn read_short_string(&mut self) -> Result<String> {
        let len = self.read_u16_be()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EdgeError::Corrupted(format!("invalid UTF-8 string: {}", e)))
    }

    /// Fails with `Corrupted` if any bytes are left over.
    pub fn finish(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EdgeError::Corrupted(format!(
                "{} trailing bytes after {}",
                self.remaining(),
                what
            )))
        }
    }
}

/// A column element with a fixed binary layout.
///
/// Equality for run detection is bitwise, so `-0.0` and `NaN` payloads
/// survive run-length coding unchanged.
pub(crate) trait Element: Clone {
    /// Appends the element's encoding.
    fn write(&self, buf: &mut Vec<u8>) -> Result<()>;
    /// Reads one element.
    fn read(reader: &mut ByteReader<'_>) -> Result<Self>;
    /// Bitwise equality.
    fn same(&self, other: &Self) -> bool;
}

impl Element for i64 {
    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_i64_be()
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Element for f64 {
    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_bits().to_be_bytes());
        Ok(())
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_f64_be()
    }
    fn same(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Element for bool {
    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(u8::from(*self));
        Ok(())
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(EdgeError::Corrupted(format!("invalid bool byte {:#04x}", other))),
        }
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Element for u16 {
    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_u16_be()
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Element for String {
    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_short_string(buf, self)
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_short_string()
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

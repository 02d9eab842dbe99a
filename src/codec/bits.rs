//! MSB-first bit stream writer and reader.

use bitvec::prelude::*;

use crate::error::{EdgeError, Result};

/// Appends bits most-significant first into a byte buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            bits: BitVec::new(),
        }
    }

    /// Number of bits written so far.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Writes a single bit.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Writes the low `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        for i in (0..count).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Finishes the stream, zero-padding the final byte.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bits.set_uninitialized(false);
        self.bits.into_vec()
    }
}

/// Reads bits most-significant first from a byte slice.
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bits: data.view_bits::<Msb0>(),
            pos: 0,
        }
    }

    /// Number of unread bits, including final-byte padding.
    pub fn remaining(&self) -> usize {
        self.bits.len() - self.pos
    }

    /// Reads one bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        match self.bits.get(self.pos) {
            Some(bit) => {
                self.pos += 1;
                Ok(*bit)
            }
            None => Err(EdgeError::InsufficientData(format!(
                "bit stream ended at bit {}",
                self.pos
            ))),
        }
    }

    /// Reads `count` bits (at most 64) into the low bits of a u64.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        if count > 64 {
            return Err(EdgeError::Corrupted(format!(
                "cannot read {} bits into u64",
                count
            )));
        }
        if self.remaining() < count as usize {
            return Err(EdgeError::InsufficientData(format!(
                "need {} bits at bit {}, {} remaining",
                count,
                self.pos,
                self.remaining()
            )));
        }
        let mut value: u64 = 0;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.bits[self.pos]);
            self.pos += 1;
        }
        Ok(value)
    }
}

//! Two-level compression for series blocks.
//!
//! Level 1 codecs understand the column's logical type and exploit its
//! shape: repeated values, small integers, slowly drifting floats or a
//! small vocabulary of strings. Level 2 codecs are general-purpose byte
//! compressors applied to the framed Level 1 output.
//!
//! ```text
//! timestamps ──DeltaDelta──┐
//!                          ├─ frame ── block codec ── payload
//! values ─────<configured>─┘
//! ```
//!
//! Every Level 1 codec implements [`ValueCodec`] over the tagged [`Column`]
//! type. [`value_codec`] maps a configured [`ValueCodecKind`] to its
//! implementation.

pub mod bit_width;
pub mod bits;
pub mod block;
pub mod delta_delta;
pub mod dictionary;
pub mod frame;
pub mod none;
pub mod primitives;
pub mod rle;
pub mod xor;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EdgeError, Result};

pub use bit_width::BitWidthCodec;
pub use block::BlockCodecKind;
pub use delta_delta::DeltaDeltaCodec;
pub use dictionary::DictionaryCodec;
pub use frame::{combine, separate};
pub use none::NoneCodec;
pub use rle::RleCodec;
pub use xor::XorCodec;

/// Logical element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Signed 64-bit integers (timestamps, counters).
    Int64,
    /// IEEE 754 double precision values.
    Float64,
    /// Booleans.
    Bool,
    /// UTF-8 strings.
    String,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int64 => "Int64",
            Self::Float64 => "Float64",
            Self::Bool => "Bool",
            Self::String => "String",
        };
        f.write_str(name)
    }
}

/// A homogeneous column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Integer column.
    Int64(Vec<i64>),
    /// Float column.
    Float64(Vec<f64>),
    /// Boolean column.
    Bool(Vec<bool>),
    /// String column.
    String(Vec<String>),
}

impl Column {
    /// Returns an empty column of the given type.
    pub fn empty(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Int64 => Self::Int64(Vec::new()),
            ColumnType::Float64 => Self::Float64(Vec::new()),
            ColumnType::Bool => Self::Bool(Vec::new()),
            ColumnType::String => Self::String(Vec::new()),
        }
    }

    /// Returns the logical type of the column.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int64(_) => ColumnType::Int64,
            Self::Float64(_) => ColumnType::Float64,
            Self::Bool(_) => ColumnType::Bool,
            Self::String(_) => ColumnType::String,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// Returns true if the column has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configured Level 1 codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValueCodecKind {
    /// Fixed-width values, no compression.
    #[default]
    None,
    /// Second-order differences.
    DeltaDelta,
    /// (run length, value) pairs.
    Rle,
    /// Narrowest fixed width that holds every value.
    BitWidth,
    /// String dictionary plus run-length coded ids.
    Dictionary,
    /// Gorilla XOR float compression.
    Xor,
}

impl ValueCodecKind {
    /// All codec kinds.
    pub const ALL: [ValueCodecKind; 6] = [
        Self::None,
        Self::DeltaDelta,
        Self::Rle,
        Self::BitWidth,
        Self::Dictionary,
        Self::Xor,
    ];

    /// Returns true if this codec can encode columns of `column_type`.
    pub fn supports(self, column_type: ColumnType) -> bool {
        value_codec(self).supports(column_type)
    }
}

impl fmt::Display for ValueCodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::DeltaDelta => "DeltaDelta",
            Self::Rle => "Rle",
            Self::BitWidth => "BitWidth",
            Self::Dictionary => "Dictionary",
            Self::Xor => "Xor",
        };
        f.write_str(name)
    }
}

/// A Level 1 codec over typed columns.
///
/// `encode` of an empty column yields an empty buffer, and `decode` of an
/// empty buffer yields an empty column of the requested type.
pub trait ValueCodec: Send + Sync {
    /// The kind this implementation answers to.
    fn kind(&self) -> ValueCodecKind;

    /// Returns true if columns of `column_type` can be encoded.
    fn supports(&self, column_type: ColumnType) -> bool;

    /// Encodes a column.
    fn encode(&self, column: &Column) -> Result<Vec<u8>>;

    /// Decodes a column of `column_type`.
    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column>;
}

static NONE: NoneCodec = NoneCodec;
static DELTA_DELTA: DeltaDeltaCodec = DeltaDeltaCodec;
static RLE: RleCodec = RleCodec;
static BIT_WIDTH: BitWidthCodec = BitWidthCodec;
static DICTIONARY: DictionaryCodec = DictionaryCodec;
static XOR: XorCodec = XorCodec;

/// Looks up the codec implementation for `kind`.
pub fn value_codec(kind: ValueCodecKind) -> &'static dyn ValueCodec {
    match kind {
        ValueCodecKind::None => &NONE,
        ValueCodecKind::DeltaDelta => &DELTA_DELTA,
        ValueCodecKind::Rle => &RLE,
        ValueCodecKind::BitWidth => &BIT_WIDTH,
        ValueCodecKind::Dictionary => &DICTIONARY,
        ValueCodecKind::Xor => &XOR,
    }
}

/// Error for a codec asked to handle a type it does not support.
pub(crate) fn unsupported(kind: ValueCodecKind, column_type: ColumnType) -> EdgeError {
    EdgeError::UnsupportedFormat(format!(
        "{} codec does not support {} columns",
        kind, column_type
    ))
}

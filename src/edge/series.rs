//! Series configuration, values and type inference.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{BlockCodecKind, ColumnType, ValueCodecKind};
use crate::error::{EdgeError, Result};
use crate::storage::keys::validate_series_path;

/// Measurements per flushed block unless configured otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 100;

/// Largest accepted block size, in measurements.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

/// Tag map of a series.
pub type Tags = BTreeMap<String, String>;

/// Logical value type of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    /// Not yet known; locked by the first insert.
    #[default]
    Untyped,
    /// Floating point readings.
    Numeric,
    /// String states.
    Categorical,
    /// Either kind; locked by the first insert.
    Mixed,
}

impl DataType {
    /// Tag used in block keys.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Untyped => "UNTYPED",
            Self::Numeric => "NUMERIC",
            Self::Categorical => "CATEGORICAL",
            Self::Mixed => "MIXED",
        }
    }

    /// Column type values are stored as, once the type is locked.
    pub fn column_type(self) -> Option<ColumnType> {
        match self {
            Self::Numeric => Some(ColumnType::Float64),
            Self::Categorical => Some(ColumnType::String),
            Self::Untyped | Self::Mixed => None,
        }
    }

    /// Returns true for a concrete type.
    pub fn is_locked(self) -> bool {
        self.column_type().is_some()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Numeric reading.
    Float(f64),
    /// Categorical reading.
    Text(String),
}

impl Value {
    /// Data type inferred from the variant.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Float(_) => DataType::Numeric,
            Self::Text(_) => DataType::Categorical,
        }
    }

    /// Numeric value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Float(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Float(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One timestamped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Reading.
    pub value: Value,
}

impl Measurement {
    /// Creates a measurement.
    pub fn new(timestamp: i64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// Registered series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Integer id assigned at creation; part of block keys.
    #[serde(default)]
    pub series_number: u32,
    /// Hierarchical path, e.g. `device_001/temperature`.
    pub path: String,
    /// Descriptive tags.
    #[serde(default)]
    pub tags: Tags,
    /// Value type.
    #[serde(default)]
    pub data_type: DataType,
    /// Level 1 codec for values.
    #[serde(default)]
    pub value_codec: ValueCodecKind,
    /// Level 2 codec for blocks.
    #[serde(default)]
    pub block_codec: BlockCodecKind,
    /// Measurements per block.
    pub block_size: usize,
}

impl SeriesConfig {
    /// Untyped series at `path` with default codecs and block size.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            series_number: 0,
            path: path.into(),
            tags: Tags::new(),
            data_type: DataType::Untyped,
            value_codec: ValueCodecKind::None,
            block_codec: BlockCodecKind::None,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Replaces all tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the data type.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets the value codec.
    pub fn with_value_codec(mut self, codec: ValueCodecKind) -> Self {
        self.value_codec = codec;
        self
    }

    /// Sets the block codec.
    pub fn with_block_codec(mut self, codec: BlockCodecKind) -> Self {
        self.block_codec = codec;
        self
    }

    /// Sets the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Registry key. Series are addressed by path; tags are attributes.
    pub fn key(&self) -> String {
        self.path.clone()
    }

    /// Checks path, tags, block size and codec compatibility.
    pub fn validate(&self) -> Result<()> {
        validate_series_path(&self.path)?;
        if let Some(v) = self.tags.get("") {
            return Err(EdgeError::InvalidSeriesId {
                id: self.path.clone(),
                reason: format!("tag with empty name (value {})", v),
            });
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(EdgeError::LimitExceeded(format!(
                "block size {} of series {} outside 1..={}",
                self.block_size, self.path, MAX_BLOCK_SIZE
            )));
        }
        if let Some(column_type) = self.data_type.column_type() {
            check_codec(self.value_codec, column_type)?;
        }
        Ok(())
    }

    /// Checks `value` against the data type. An untyped or mixed series is
    /// locked to the value's type; returns true when that happened.
    pub(crate) fn accept(&mut self, value: &Value) -> Result<bool> {
        let actual = value.data_type();
        if self.data_type.is_locked() {
            if self.data_type != actual {
                return Err(EdgeError::TypeMismatch {
                    expected: self.data_type.to_string(),
                    actual: actual.to_string(),
                });
            }
            return Ok(false);
        }
        if let Some(column_type) = actual.column_type() {
            check_codec(self.value_codec, column_type)?;
        }
        self.data_type = actual;
        Ok(true)
    }
}

fn check_codec(codec: ValueCodecKind, column_type: ColumnType) -> Result<()> {
    if codec.supports(column_type) {
        Ok(())
    } else {
        Err(EdgeError::UnsupportedFormat(format!(
            "{} codec cannot store {} values",
            codec, column_type
        )))
    }
}

/// Returns true if every filter tag is present with the same value.
pub fn match_tags(tags: &Tags, filter: &Tags) -> bool {
    filter.iter().all(|(k, v)| tags.get(k) == Some(v))
}

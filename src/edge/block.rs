//! Block encoding for the ingestion pipeline.
//!
//! A block is built in two levels:
//!
//! 1. Timestamps are coded with the integer delta-of-delta codec and values
//!    with the series' configured codec. The two results are framed.
//! 2. The frame is compressed with the series' block codec.
//!
//! The block's time range is part of its key, so it is never stored in the
//! payload.

use crate::codec::{
    combine, separate, value_codec, BlockCodecKind, Column, ColumnType, ValueCodecKind,
};
use crate::edge::series::{Measurement, Value};
use crate::error::{EdgeError, Result};

/// An encoded block and the range it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedBlock {
    /// Smallest timestamp in the block.
    pub start: i64,
    /// Largest timestamp in the block.
    pub end: i64,
    /// Level 1 codec used for values.
    pub value_codec: ValueCodecKind,
    /// Level 2 codec used for the frame.
    pub block_codec: BlockCodecKind,
    /// Stored bytes.
    pub payload: Vec<u8>,
}

fn value_column(measurements: &[Measurement], column_type: ColumnType) -> Result<Column> {
    let mismatch = |m: &Measurement| EdgeError::TypeMismatch {
        expected: column_type.to_string(),
        actual: m.value.data_type().to_string(),
    };
    match column_type {
        ColumnType::Float64 => measurements
            .iter()
            .map(|m| m.value.as_f64().ok_or_else(|| mismatch(m)))
            .collect::<Result<Vec<_>>>()
            .map(Column::Float64),
        ColumnType::String => measurements
            .iter()
            .map(|m| m.value.as_str().map(str::to_string).ok_or_else(|| mismatch(m)))
            .collect::<Result<Vec<_>>>()
            .map(Column::String),
        other => Err(EdgeError::UnsupportedFormat(format!(
            "series values cannot be stored as {}",
            other
        ))),
    }
}

/// Encodes `measurements` into a block. The slice must not be empty.
pub fn encode_block(
    measurements: &[Measurement],
    column_type: ColumnType,
    value_kind: ValueCodecKind,
    block_kind: BlockCodecKind,
) -> Result<CompressedBlock> {
    let (start, end) = measurements
        .iter()
        .map(|m| m.timestamp)
        .fold(None, |range: Option<(i64, i64)>, ts| match range {
            None => Some((ts, ts)),
            Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
        })
        .ok_or_else(|| EdgeError::InsufficientData("cannot encode an empty block".to_string()))?;

    let timestamps = Column::Int64(measurements.iter().map(|m| m.timestamp).collect());
    let timestamps = value_codec(ValueCodecKind::DeltaDelta).encode(&timestamps)?;
    let values = value_codec(value_kind).encode(&value_column(measurements, column_type)?)?;
    let frame = combine(&timestamps, &values)?;

    Ok(CompressedBlock {
        start,
        end,
        value_codec: value_kind,
        block_codec: block_kind,
        payload: block_kind.compress(&frame)?,
    })
}

/// Decodes a block payload back into measurements, in stored order.
pub fn decode_block(
    payload: &[u8],
    column_type: ColumnType,
    value_kind: ValueCodecKind,
    block_kind: BlockCodecKind,
) -> Result<Vec<Measurement>> {
    let frame = block_kind.decompress(payload)?;
    let (timestamps, values) = separate(&frame)?;

    let timestamps = match value_codec(ValueCodecKind::DeltaDelta)
        .decode(timestamps, ColumnType::Int64)?
    {
        Column::Int64(ts) => ts,
        other => {
            return Err(EdgeError::Corrupted(format!(
                "timestamp column decoded as {}",
                other.column_type()
            )))
        }
    };
    let values: Vec<Value> = match value_codec(value_kind).decode(values, column_type)? {
        Column::Float64(v) => v.into_iter().map(Value::Float).collect(),
        Column::String(v) => v.into_iter().map(Value::Text).collect(),
        other => {
            return Err(EdgeError::Corrupted(format!(
                "value column decoded as {}",
                other.column_type()
            )))
        }
    };
    if timestamps.len() != values.len() {
        return Err(EdgeError::Corrupted(format!(
            "block has {} timestamps and {} values",
            timestamps.len(),
            values.len()
        )));
    }

    Ok(timestamps
        .into_iter()
        .zip(values)
        .map(|(timestamp, value)| Measurement { timestamp, value })
        .collect())
}

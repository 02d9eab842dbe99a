//! Run-length encoding.
//!
//! Layout:
//!
//! ```text
//! [count: u32 BE] ([run: u8][value])*
//! ```
//!
//! `run` is in `1..=255`; a longer run continues in a new pair. Values use
//! their fixed-width big-endian form and strings a u16 length prefix.

use crate::codec::primitives::{write_count, ByteReader, Element};
use crate::codec::{Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::{EdgeError, Result};

/// Longest run a single pair can describe.
pub const MAX_RUN: u8 = u8::MAX;

/// Run-length codec for any column type.
#[derive(Debug, Clone, Copy, Default)]
pub struct RleCodec;

/// Encodes a slice of elements as run-length pairs.
pub(crate) fn encode_runs<T: Element>(values: &[T]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    write_count(&mut buf, values.len())?;

    let mut current = &values[0];
    let mut run: u8 = 1;
    for value in &values[1..] {
        if value.same(current) && run < MAX_RUN {
            run += 1;
        } else {
            buf.push(run);
            current.write(&mut buf)?;
            current = value;
            run = 1;
        }
    }
    buf.push(run);
    current.write(&mut buf)?;
    Ok(buf)
}

/// Expands run-length pairs, checking the total against the stored count.
pub(crate) fn decode_runs<T: Element>(data: &[u8]) -> Result<Vec<T>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let count = reader.read_count()?;
    let mut values = Vec::with_capacity(count.min(reader.remaining().saturating_mul(MAX_RUN as usize)));

    while !reader.is_empty() {
        let run = reader.read_u8()? as usize;
        if run == 0 {
            return Err(EdgeError::Corrupted(format!(
                "zero-length run at offset {}",
                reader.position() - 1
            )));
        }
        let value = T::read(&mut reader)?;
        if values.len() + run > count {
            return Err(EdgeError::Corrupted(format!(
                "runs expand beyond declared count {}",
                count
            )));
        }
        values.extend(std::iter::repeat(value).take(run));
    }

    if values.len() != count {
        return Err(EdgeError::InsufficientData(format!(
            "runs expand to {} values, expected {}",
            values.len(),
            count
        )));
    }
    Ok(values)
}

impl ValueCodec for RleCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::Rle
    }

    fn supports(&self, _column_type: ColumnType) -> bool {
        true
    }

    fn encode(&self, column: &Column) -> Result<Vec<u8>> {
        match column {
            Column::Int64(v) => encode_runs(v),
            Column::Float64(v) => encode_runs(v),
            Column::Bool(v) => encode_runs(v),
            Column::String(v) => encode_runs(v),
        }
    }

    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column> {
        Ok(match column_type {
            ColumnType::Int64 => Column::Int64(decode_runs(data)?),
            ColumnType::Float64 => Column::Float64(decode_runs(data)?),
            ColumnType::Bool => Column::Bool(decode_runs(data)?),
            ColumnType::String => Column::String(decode_runs(data)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_for_repeated_values() {
        let encoded = RleCodec.encode(&Column::Int64(vec![5, 5, 5, 2, 2])).unwrap();

        let mut expected = vec![0, 0, 0, 5];
        expected.push(3);
        expected.extend_from_slice(&5i64.to_be_bytes());
        expected.push(2);
        expected.extend_from_slice(&2i64.to_be_bytes());
        assert_eq!(encoded, expected);

        let decoded = RleCodec.decode(&encoded, ColumnType::Int64).unwrap();
        assert_eq!(decoded, Column::Int64(vec![5, 5, 5, 2, 2]));
    }

    #[test]
    fn test_run_saturates_at_255() {
        let values = vec![true; 600];
        let encoded = encode_runs(&values).unwrap();
        // count + three (run, bool) pairs: 255, 255, 90
        assert_eq!(encoded.len(), 4 + 3 * 2);
        assert_eq!(encoded[4], 255);
        assert_eq!(encoded[6], 255);
        assert_eq!(encoded[8], 90);
        assert_eq!(decode_runs::<bool>(&encoded).unwrap(), values);
    }

    #[test]
    fn test_string_runs() {
        let column = Column::String(vec![
            "idle".into(),
            "idle".into(),
            "running".into(),
            "".into(),
            "".into(),
        ]);
        let encoded = RleCodec.encode(&column).unwrap();
        assert_eq!(RleCodec.decode(&encoded, ColumnType::String).unwrap(), column);
    }

    #[test]
    fn test_negative_zero_keeps_its_sign() {
        let column = Column::Float64(vec![0.0, -0.0, -0.0]);
        let encoded = RleCodec.encode(&column).unwrap();
        let Column::Float64(decoded) = RleCodec.decode(&encoded, ColumnType::Float64).unwrap() else {
            panic!("wrong column type");
        };
        assert!(decoded[0].is_sign_positive());
        assert!(decoded[1].is_sign_negative());
        assert!(decoded[2].is_sign_negative());
    }

    #[test]
    fn test_corrupted_runs() {
        // Zero run
        let data = [0, 0, 0, 1, 0, 1];
        assert!(matches!(
            decode_runs::<bool>(&data),
            Err(EdgeError::Corrupted(_))
        ));

        // Expands past count
        let data = [0, 0, 0, 1, 2, 1];
        assert!(matches!(
            decode_runs::<bool>(&data),
            Err(EdgeError::Corrupted(_))
        ));

        // Falls short of count
        let data = [0, 0, 0, 3, 2, 1];
        assert!(matches!(
            decode_runs::<bool>(&data),
            Err(EdgeError::InsufficientData(_))
        ));

        // Truncated value
        let data = [0, 0, 0, 1, 1, 0, 0];
        assert!(matches!(
            decode_runs::<i64>(&data),
            Err(EdgeError::InsufficientData(_))
        ));
    }
}

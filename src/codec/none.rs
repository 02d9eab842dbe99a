//! Pass-through value codec.
//!
//! Layout: `[count: u32 BE][value]*`, each value in its fixed-width
//! big-endian form (strings are u16-length prefixed).

use crate::codec::primitives::{write_count, ByteReader, Element};
use crate::codec::{Column, ColumnType, ValueCodec, ValueCodecKind};
use crate::error::Result;

/// Stores values without compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneCodec;

pub(crate) fn encode_elements<T: Element>(values: &[T]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::with_capacity(4 + values.len() * 8);
    write_count(&mut buf, values.len())?;
    for value in values {
        value.write(&mut buf)?;
    }
    Ok(buf)
}

pub(crate) fn decode_elements<T: Element>(data: &[u8]) -> Result<Vec<T>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let count = reader.read_count()?;
    // Never reserve more than the input could hold
    let mut values = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        values.push(T::read(&mut reader)?);
    }
    reader.finish("uncompressed column")?;
    Ok(values)
}

impl ValueCodec for NoneCodec {
    fn kind(&self) -> ValueCodecKind {
        ValueCodecKind::None
    }

    fn supports(&self, _column_type: ColumnType) -> bool {
        true
    }

    fn encode(&self, column: &Column) -> Result<Vec<u8>> {
        match column {
            Column::Int64(v) => encode_elements(v),
            Column::Float64(v) => encode_elements(v),
            Column::Bool(v) => encode_elements(v),
            Column::String(v) => encode_elements(v),
        }
    }

    fn decode(&self, data: &[u8], column_type: ColumnType) -> Result<Column> {
        Ok(match column_type {
            ColumnType::Int64 => Column::Int64(decode_elements(data)?),
            ColumnType::Float64 => Column::Float64(decode_elements(data)?),
            ColumnType::Bool => Column::Bool(decode_elements(data)?),
            ColumnType::String => Column::String(decode_elements(data)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EdgeError;

    #[test]
    fn test_layout_is_count_then_values() {
        let encoded = NoneCodec.encode(&Column::Int64(vec![1, -1])).unwrap();
        let mut expected = vec![0, 0, 0, 2];
        expected.extend_from_slice(&1i64.to_be_bytes());
        expected.extend_from_slice(&(-1i64).to_be_bytes());
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_roundtrip_all_types() {
        let columns = vec![
            Column::Int64(vec![i64::MIN, 0, i64::MAX]),
            Column::Float64(vec![-0.0, 1.5, f64::MAX]),
            Column::Bool(vec![true, false, true]),
            Column::String(vec!["".into(), "on".into(), "ñandú".into()]),
        ];
        for column in columns {
            let encoded = NoneCodec.encode(&column).unwrap();
            let decoded = NoneCodec.decode(&encoded, column.column_type()).unwrap();
            assert_eq!(decoded, column);
        }
    }

    #[test]
    fn test_truncated_input() {
        let encoded = NoneCodec.encode(&Column::Float64(vec![1.0, 2.0])).unwrap();
        let err = NoneCodec
            .decode(&encoded[..encoded.len() - 1], ColumnType::Float64)
            .unwrap_err();
        assert!(matches!(err, EdgeError::InsufficientData(_)));
    }

    #[test]
    fn test_huge_count_does_not_allocate() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0];
        assert!(NoneCodec.decode(&data, ColumnType::Bool).is_err());
    }
}

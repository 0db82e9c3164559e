// Binary batch codec: a row count, then each column as a type tag, an optional null
// bitmap, and big-endian values.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::batch::{Batch, Column, ColumnData, ColumnType};
use crate::{Error, Result};

const FLAG_HAS_NULLS: u8 = 0x01;

/// Converts batches to payload bytes and back.
///
/// Implementations may keep scratch state between calls, hence `&mut self`.
pub trait BatchCodec: Send {
    fn encode(&mut self, batch: &Batch, out: &mut BytesMut) -> Result<()>;
    fn decode(&mut self, payload: Bytes) -> Result<Batch>;
}

/// Codec bound to a fixed schema.
///
/// ```
/// use bytes::BytesMut;
/// use flow_columnar::{Batch, BatchCodec, Column, ColumnData, ColumnType, ColumnarCodec};
///
/// let mut codec = ColumnarCodec::new(vec![ColumnType::Int64]);
/// let batch = Batch::new(vec![Column::new(ColumnData::Int64(vec![7, 8]))]).expect("batch");
/// let mut buf = BytesMut::new();
/// codec.encode(&batch, &mut buf).expect("encode");
/// assert_eq!(codec.decode(buf.freeze()).expect("decode"), batch);
/// ```
#[derive(Debug, Clone)]
pub struct ColumnarCodec {
    types: Vec<ColumnType>,
    bitmap: Vec<u8>,
}

impl ColumnarCodec {
    pub fn new(types: Vec<ColumnType>) -> Self {
        Self {
            types,
            bitmap: Vec::new(),
        }
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    fn check_schema(&self, found: impl ExactSizeIterator<Item = ColumnType>) -> Result<()> {
        if found.len() != self.types.len() {
            return Err(Error::ColumnCount {
                expected: self.types.len(),
                found: found.len(),
            });
        }
        for (index, (found, &expected)) in found.zip(self.types.iter()).enumerate() {
            if found != expected {
                return Err(Error::TypeMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

impl BatchCodec for ColumnarCodec {
    fn encode(&mut self, batch: &Batch, out: &mut BytesMut) -> Result<()> {
        if batch.selection().is_some() {
            return Err(Error::SelectionNotAllowed);
        }
        self.check_schema(batch.columns().iter().map(Column::column_type))?;
        let rows = u32::try_from(batch.len()).map_err(|_| Error::TooLarge)?;
        let width = u16::try_from(batch.width()).map_err(|_| Error::TooLarge)?;
        out.put_u32(rows);
        out.put_u16(width);
        for column in batch.columns() {
            out.put_u8(column.column_type().tag());
            match &column.nulls {
                Some(mask) => {
                    out.put_u8(FLAG_HAS_NULLS);
                    pack_bits(mask, &mut self.bitmap);
                    out.put_slice(&self.bitmap);
                }
                None => out.put_u8(0),
            }
            match &column.data {
                ColumnData::Int64(values) => {
                    out.reserve(values.len() * 8);
                    values.iter().for_each(|&v| out.put_i64(v));
                }
                ColumnData::Float64(values) => {
                    out.reserve(values.len() * 8);
                    values.iter().for_each(|&v| out.put_u64(v.to_bits()));
                }
                ColumnData::Bool(values) => {
                    pack_bits(values, &mut self.bitmap);
                    out.put_slice(&self.bitmap);
                }
                ColumnData::Bytes(values) => {
                    for value in values {
                        let len = u32::try_from(value.len()).map_err(|_| Error::TooLarge)?;
                        out.put_u32(len);
                        out.put_slice(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn decode(&mut self, mut payload: Bytes) -> Result<Batch> {
        need(&payload, 6)?;
        let rows = payload.get_u32() as usize;
        let width = payload.get_u16() as usize;
        let mut columns = Vec::with_capacity(width);
        for _ in 0..width {
            need(&payload, 2)?;
            let column_type = ColumnType::from_tag(payload.get_u8())?;
            let flags = payload.get_u8();
            let nulls = if flags & FLAG_HAS_NULLS != 0 {
                Some(unpack_bits(&mut payload, rows)?)
            } else {
                None
            };
            let data = match column_type {
                ColumnType::Int64 => {
                    need(&payload, rows.saturating_mul(8))?;
                    ColumnData::Int64((0..rows).map(|_| payload.get_i64()).collect())
                }
                ColumnType::Float64 => {
                    need(&payload, rows.saturating_mul(8))?;
                    ColumnData::Float64(
                        (0..rows)
                            .map(|_| f64::from_bits(payload.get_u64()))
                            .collect(),
                    )
                }
                ColumnType::Bool => ColumnData::Bool(unpack_bits(&mut payload, rows)?),
                ColumnType::Bytes => {
                    // Every value carries at least its 4-byte length prefix.
                    need(&payload, rows.saturating_mul(4))?;
                    let mut values = Vec::with_capacity(rows);
                    for _ in 0..rows {
                        need(&payload, 4)?;
                        let len = payload.get_u32() as usize;
                        need(&payload, len)?;
                        values.push(payload.split_to(len));
                    }
                    ColumnData::Bytes(values)
                }
            };
            columns.push(Column { data, nulls });
        }
        if payload.has_remaining() {
            return Err(Error::TrailingBytes(payload.remaining()));
        }
        self.check_schema(columns.iter().map(Column::column_type))?;
        Batch::new(columns)
    }
}

fn need(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::Truncated);
    }
    Ok(())
}

fn pack_bits(values: &[bool], out: &mut Vec<u8>) {
    out.clear();
    out.resize(values.len().div_ceil(8), 0);
    for (i, _) in values.iter().enumerate().filter(|(_, set)| **set) {
        out[i / 8] |= 1 << (i % 8);
    }
}

fn unpack_bits(buf: &mut Bytes, count: usize) -> Result<Vec<bool>> {
    let len = count.div_ceil(8);
    need(buf, len)?;
    let packed = buf.split_to(len);
    Ok((0..count)
        .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnType> {
        vec![
            ColumnType::Int64,
            ColumnType::Float64,
            ColumnType::Bool,
            ColumnType::Bytes,
        ]
    }

    fn sample() -> Batch {
        Batch::new(vec![
            Column::new(ColumnData::Int64(vec![-1, 0, i64::MAX])),
            Column::with_nulls(
                ColumnData::Float64(vec![1.5, 0.0, -2.25]),
                vec![false, true, false],
            ),
            Column::new(ColumnData::Bool(vec![true, false, true])),
            Column::new(ColumnData::Bytes(vec![
                Bytes::from_static(b"alpha"),
                Bytes::new(),
                Bytes::from_static(b"gamma"),
            ])),
        ])
        .expect("batch")
    }

    #[test]
    fn encoded_batch_decodes_to_same_rows() {
        let mut codec = ColumnarCodec::new(schema());
        let mut buf = BytesMut::new();
        codec.encode(&sample(), &mut buf).expect("encode");
        assert_eq!(codec.decode(buf.freeze()).expect("decode"), sample());
    }

    #[test]
    fn selection_vector_is_never_encoded() {
        let mut codec = ColumnarCodec::new(schema());
        let selected = sample().with_selection(vec![0, 2]).expect("selection");
        let mut buf = BytesMut::new();
        assert_eq!(
            codec.encode(&selected, &mut buf).expect_err("selection"),
            Error::SelectionNotAllowed
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn schema_mismatch_is_reported_with_column_index() {
        let mut codec = ColumnarCodec::new(vec![
            ColumnType::Int64,
            ColumnType::Int64,
            ColumnType::Bool,
            ColumnType::Bytes,
        ]);
        let err = codec
            .encode(&sample(), &mut BytesMut::new())
            .expect_err("mismatch");
        assert_eq!(
            err,
            Error::TypeMismatch {
                index: 1,
                expected: ColumnType::Int64,
                found: ColumnType::Float64
            }
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut codec = ColumnarCodec::new(schema());
        let mut buf = BytesMut::new();
        codec.encode(&sample(), &mut buf).expect("encode");
        let full = buf.freeze();
        let err = codec
            .decode(full.slice(0..full.len() - 3))
            .expect_err("truncated");
        assert_eq!(err, Error::Truncated);
    }

    #[test]
    fn oversized_row_count_is_truncated_not_allocated() {
        let mut codec = ColumnarCodec::new(vec![ColumnType::Bytes]);
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        buf.put_u16(1);
        buf.put_u8(ColumnType::Bytes.tag());
        buf.put_u8(0);
        assert_eq!(
            codec.decode(buf.freeze()).expect_err("row count"),
            Error::Truncated
        );
    }

    #[test]
    fn oversized_row_count_on_fixed_width_column_is_truncated() {
        let mut codec = ColumnarCodec::new(vec![ColumnType::Int64]);
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        buf.put_u16(1);
        buf.put_u8(ColumnType::Int64.tag());
        buf.put_u8(0);
        buf.put_i64(7);
        assert_eq!(
            codec.decode(buf.freeze()).expect_err("row count"),
            Error::Truncated
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut codec = ColumnarCodec::new(vec![ColumnType::Bool]);
        let batch =
            Batch::new(vec![Column::new(ColumnData::Bool(vec![true; 9]))]).expect("batch");
        let mut buf = BytesMut::new();
        codec.encode(&batch, &mut buf).expect("encode");
        buf.put_u8(0xAB);
        assert_eq!(
            codec.decode(buf.freeze()).expect_err("trailing"),
            Error::TrailingBytes(1)
        );
    }

    #[test]
    fn bitmaps_pack_eight_rows_per_byte() {
        let mut packed = Vec::new();
        pack_bits(&[true, false, false, false, false, false, false, true, true], &mut packed);
        assert_eq!(packed, vec![0b1000_0001, 0b0000_0001]);
    }
}

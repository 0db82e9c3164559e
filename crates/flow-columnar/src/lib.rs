//! Columnar batches exchanged between flow fragments, and their wire codec.
//!
//! A [`Batch`] is a set of equal-length typed columns with an optional selection vector.
//! The [`BatchCodec`] turns dense batches into payload bytes and back; it never encodes
//! a selection vector, so callers densify first (see [`Batch::densify`]).

mod batch;
mod codec;

pub use batch::{Batch, Column, ColumnData, ColumnType};
pub use codec::{BatchCodec, ColumnarCodec};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("column {index} has {found} rows, expected {expected}")]
    RaggedColumns {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("null mask for column {index} has {found} entries, expected {expected}")]
    NullMaskLength {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("selection index {index} out of bounds for {rows} rows")]
    SelectionOutOfBounds { index: usize, rows: usize },
    #[error("selection vector must be strictly increasing")]
    SelectionUnordered,
    #[error("batch carries a selection vector; densify before encoding")]
    SelectionNotAllowed,
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("column {index} has type {found:?}, expected {expected:?}")]
    TypeMismatch {
        index: usize,
        expected: ColumnType,
        found: ColumnType,
    },
    #[error("unknown column type tag {0}")]
    UnknownTypeTag(u8),
    #[error("payload truncated")]
    Truncated,
    #[error("{0} trailing bytes after batch")]
    TrailingBytes(usize),
    #[error("batch too large to encode")]
    TooLarge,
}

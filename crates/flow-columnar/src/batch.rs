// In-memory columnar batch with an optional row selection overlay.
use bytes::Bytes;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    Bytes,
}

impl ColumnType {
    pub(crate) fn tag(self) -> u8 {
        match self {
            ColumnType::Int64 => 1,
            ColumnType::Float64 => 2,
            ColumnType::Bool => 3,
            ColumnType::Bytes => 4,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(ColumnType::Int64),
            2 => Ok(ColumnType::Float64),
            3 => Ok(ColumnType::Bool),
            4 => Ok(ColumnType::Bytes),
            other => Err(Error::UnknownTypeTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Bytes(Vec<Bytes>),
}

impl ColumnData {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::Bytes(_) => ColumnType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(values) => values.len(),
            ColumnData::Float64(values) => values.len(),
            ColumnData::Bool(values) => values.len(),
            ColumnData::Bytes(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn gather(&self, rows: &[usize]) -> Self {
        match self {
            ColumnData::Int64(values) => ColumnData::Int64(rows.iter().map(|&r| values[r]).collect()),
            ColumnData::Float64(values) => {
                ColumnData::Float64(rows.iter().map(|&r| values[r]).collect())
            }
            ColumnData::Bool(values) => ColumnData::Bool(rows.iter().map(|&r| values[r]).collect()),
            ColumnData::Bytes(values) => {
                ColumnData::Bytes(rows.iter().map(|&r| values[r].clone()).collect())
            }
        }
    }
}

/// One typed column. `nulls[i] == true` marks row `i` as NULL; the value slot is then
/// unspecified but present.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub data: ColumnData,
    pub nulls: Option<Vec<bool>>,
}

impl Column {
    pub fn new(data: ColumnData) -> Self {
        Self { data, nulls: None }
    }

    pub fn with_nulls(data: ColumnData, nulls: Vec<bool>) -> Self {
        Self {
            data,
            nulls: Some(nulls),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.nulls.as_ref().is_some_and(|mask| mask[row])
    }

    fn gather(&self, rows: &[usize]) -> Self {
        Self {
            data: self.data.gather(rows),
            nulls: self
                .nulls
                .as_ref()
                .map(|mask| rows.iter().map(|&r| mask[r]).collect()),
        }
    }
}

/// A block of rows produced by one pull from an execution operator.
///
/// ```
/// use flow_columnar::{Batch, Column, ColumnData};
///
/// let batch = Batch::new(vec![Column::new(ColumnData::Int64(vec![1, 2, 3]))])
///     .expect("batch")
///     .with_selection(vec![0, 2])
///     .expect("selection");
/// assert_eq!(batch.len(), 2);
///
/// let dense = batch.densify();
/// assert!(dense.selection().is_none());
/// assert_eq!(dense.column(0).data, ColumnData::Int64(vec![1, 3]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
    rows: usize,
    selection: Option<Vec<usize>>,
}

impl Batch {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |column| column.data.len());
        for (index, column) in columns.iter().enumerate() {
            let found = column.data.len();
            if found != rows {
                return Err(Error::RaggedColumns {
                    index,
                    expected: rows,
                    found,
                });
            }
            if let Some(mask) = &column.nulls
                && mask.len() != rows
            {
                return Err(Error::NullMaskLength {
                    index,
                    expected: rows,
                    found: mask.len(),
                });
            }
        }
        Ok(Self {
            columns,
            rows,
            selection: None,
        })
    }

    /// The zero-length batch that signals end of input.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: 0,
            selection: None,
        }
    }

    pub fn with_selection(mut self, selection: Vec<usize>) -> Result<Self> {
        if let Some(&index) = selection.iter().find(|&&index| index >= self.rows) {
            return Err(Error::SelectionOutOfBounds {
                index,
                rows: self.rows,
            });
        }
        if selection.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::SelectionUnordered);
        }
        self.selection = Some(selection);
        Ok(self)
    }

    /// Number of logical rows, honouring the selection vector.
    pub fn len(&self) -> usize {
        self.selection.as_ref().map_or(self.rows, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn selection(&self) -> Option<&[usize]> {
        self.selection.as_deref()
    }

    /// Materialise the selected rows so the result carries no selection vector.
    pub fn densify(self) -> Self {
        let Some(selection) = self.selection else {
            return self;
        };
        let columns = self
            .columns
            .iter()
            .map(|column| column.gather(&selection))
            .collect();
        Self {
            columns,
            rows: selection.len(),
            selection: None,
        }
    }
}

//! Column blocks exchanged with remote replicas.
//!
//! A block is a batch of rows with a schema: each column carries a name, a
//! type, and its values. Values are either a full arrow array or a constant
//! (a one-element array plus a logical row count). Constants matter to the
//! result adapter: a remote server materializes constants before shipping
//! them, and the client rebuilds them against the expected header.

use arrow_array::{new_empty_array, Array, ArrayRef};
use arrow_schema::DataType;

use crate::error::{RemoteError, Result};

/// Scalar subquery results sent right after the query, keyed by name.
pub type Scalars = std::collections::HashMap<String, Block>;

/// Auxiliary info carried alongside a block through the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Bucket number for two-level aggregation, -1 when not applicable.
    pub bucket_num: i32,
    /// Set when the block holds overflow rows of a partial GROUP BY.
    pub is_overflows: bool,
}

impl Default for BlockInfo {
    fn default() -> Self {
        BlockInfo { bucket_num: -1, is_overflows: false }
    }
}

/// Values of a single column.
#[derive(Debug, Clone)]
pub enum ColumnData {
    /// One value per row.
    Full(ArrayRef),
    /// A single value repeated for `rows` rows. `value` has exactly one
    /// element.
    Const { value: ArrayRef, rows: usize },
}

impl ColumnData {
    pub fn rows(&self) -> usize {
        match self {
            ColumnData::Full(array) => array.len(),
            ColumnData::Const { rows, .. } => *rows,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, ColumnData::Const { .. })
    }
}

/// A named, typed column inside a block.
#[derive(Debug, Clone)]
pub struct BlockColumn {
    pub name: String,
    pub data_type: DataType,
    pub data: ColumnData,
}

impl BlockColumn {
    /// Column backed by a full array; the type is taken from the array.
    pub fn full(name: impl Into<String>, array: ArrayRef) -> Self {
        let data_type = array.data_type().clone();
        BlockColumn { name: name.into(), data_type, data: ColumnData::Full(array) }
    }

    /// Constant column: `value` must hold exactly one element.
    pub fn constant(name: impl Into<String>, value: ArrayRef, rows: usize) -> Result<Self> {
        if value.len() != 1 {
            return Err(RemoteError::BlockStructure(format!(
                "constant column value must have exactly one element, got {}",
                value.len()
            )));
        }
        let data_type = value.data_type().clone();
        Ok(BlockColumn { name: name.into(), data_type, data: ColumnData::Const { value, rows } })
    }

    pub fn rows(&self) -> usize {
        self.data.rows()
    }

    pub fn is_const(&self) -> bool {
        self.data.is_const()
    }

    /// The first value of the column as a one-element array.
    pub fn first_value(&self) -> Result<ArrayRef> {
        if self.rows() == 0 {
            return Err(RemoteError::BlockStructure(format!(
                "cannot take a value from empty column {}",
                self.name
            )));
        }
        Ok(match &self.data {
            ColumnData::Full(array) => array.slice(0, 1),
            ColumnData::Const { value, .. } => value.clone(),
        })
    }

    /// Pure value cast to another type; constness is preserved.
    pub fn cast_to(&self, to: &DataType) -> Result<BlockColumn> {
        let data = match &self.data {
            ColumnData::Full(array) => ColumnData::Full(arrow::compute::cast(array.as_ref(), to)?),
            ColumnData::Const { value, rows } => ColumnData::Const {
                value: arrow::compute::cast(value.as_ref(), to)?,
                rows: *rows,
            },
        };
        Ok(BlockColumn { name: self.name.clone(), data_type: to.clone(), data })
    }

    pub fn slice(&self, offset: usize, length: usize) -> BlockColumn {
        let data = match &self.data {
            ColumnData::Full(array) => ColumnData::Full(array.slice(offset, length)),
            ColumnData::Const { value, .. } => {
                ColumnData::Const { value: value.clone(), rows: length }
            }
        };
        BlockColumn { name: self.name.clone(), data_type: self.data_type.clone(), data }
    }
}

/// A batch of rows with a schema. A block with no columns is "empty" and is
/// used both as the terminal marker of a result stream and as the
/// end-of-data marker on the outbound side.
#[derive(Debug, Clone, Default)]
pub struct Block {
    columns: Vec<BlockColumn>,
    pub info: BlockInfo,
}

impl Block {
    pub fn empty() -> Self {
        Block::default()
    }

    pub fn new(columns: Vec<BlockColumn>) -> Result<Self> {
        let mut block = Block::empty();
        for column in columns {
            block.push(column)?;
        }
        Ok(block)
    }

    /// Schema-only block: same columns, zero rows.
    pub fn header(columns: Vec<(&str, DataType)>) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, data_type)| {
                let array = new_empty_array(&data_type);
                BlockColumn { name: name.to_string(), data_type, data: ColumnData::Full(array) }
            })
            .collect();
        Block { columns, info: BlockInfo::default() }
    }

    pub fn push(&mut self, column: BlockColumn) -> Result<()> {
        if let Some(first) = self.columns.first() {
            if first.rows() != column.rows() {
                return Err(RemoteError::BlockStructure(format!(
                    "column {} has {} rows, block has {}",
                    column.name,
                    column.rows(),
                    first.rows()
                )));
            }
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|c| c.rows()).unwrap_or(0)
    }

    /// True when the block carries no columns at all (not merely zero rows).
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&BlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn slice(&self, offset: usize, length: usize) -> Block {
        Block {
            columns: self.columns.iter().map(|c| c.slice(offset, length)).collect(),
            info: self.info,
        }
    }

    /// Same schema, zero rows.
    pub fn cloned_empty(&self) -> Block {
        Block {
            columns: self.columns.iter().map(|c| c.slice(0, 0)).collect(),
            info: BlockInfo::default(),
        }
    }
}

//! Reshaping inbound blocks to the expected result header.
//!
//! A remote server may ship blocks with slightly different column types,
//! extra columns, or materialized constants. The adapter rebuilds each block
//! against the header the caller expects.

use crate::block::{Block, BlockColumn, ColumnData};
use crate::error::{RemoteError, Result};

/// Adapts `block` to the schema of `header`.
///
/// An empty header means the caller accepts anything and the block passes
/// through unchanged. Otherwise, for every header column: constants are
/// rebuilt from the block's materialized value when present (the value may
/// differ per server for functions like `version()`), or cloned from the
/// header when absent; ordinary columns are value-cast to the expected type.
/// Columns the header does not mention are dropped; a missing non-constant
/// column is an error. Auxiliary block info is preserved.
pub fn adapt_block(block: &Block, header: &Block) -> Result<Block> {
    if header.is_empty() {
        return Ok(block.clone());
    }

    let mut result = Block::empty();
    result.info = block.info;

    for expected in header.columns() {
        let column = match &expected.data {
            ColumnData::Const { value: expected_value, .. } => {
                if block.rows() > 0 && block.has(&expected.name) {
                    let materialized = block
                        .get(&expected.name)
                        .ok_or_else(|| missing_column(&expected.name))?;
                    let first = materialized.first_value()?;
                    let cast = arrow::compute::cast(first.as_ref(), &expected.data_type)?;
                    BlockColumn::constant(expected.name.clone(), cast, block.rows())?
                } else {
                    BlockColumn::constant(
                        expected.name.clone(),
                        expected_value.clone(),
                        block.rows(),
                    )?
                }
            }
            ColumnData::Full(_) => {
                let actual =
                    block.get(&expected.name).ok_or_else(|| missing_column(&expected.name))?;
                actual.cast_to(&expected.data_type)?
            }
        };
        result.push(column)?;
    }

    Ok(result)
}

fn missing_column(name: &str) -> RemoteError {
    RemoteError::BlockStructure(format!("column {name} expected in result block but is missing"))
}

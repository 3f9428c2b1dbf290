//! Fetched rows.

use std::sync::Arc;

use super::column::{Column, ColumnInfo};
use super::value::Value;

/// Decoded values of one row plus the column info shared by every row of
/// the rowset.
#[derive(Debug)]
pub struct Row {
    values: Vec<Value>,
    column_info: Arc<ColumnInfo>,
}

impl Row {
    pub fn new(values: Vec<Value>, column_info: Arc<ColumnInfo>) -> Self {
        Self {
            values,
            column_info,
        }
    }

    /// Value of a 0-based column.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.values.get_mut(index)
    }

    /// Value of the column whose display name matches, ignoring ASCII case.
    pub fn get_by_name(&self, name: impl AsRef<[u8]>) -> Option<&Value> {
        let index = self.column_info.find_by_name(name)?;
        self.values.get(index)
    }

    /// Move a value out, leaving NULL behind. Long columns hold streams,
    /// which cannot be cloned.
    pub fn take(&mut self, index: usize) -> Option<Value> {
        self.values.get_mut(index).map(|slot| std::mem::replace(slot, Value::Null))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn columns(&self) -> &[Column] {
        &self.column_info.columns
    }

    /// Shared column info; the same `Arc` for every row of a rowset.
    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.column_info
    }

    pub fn column_names(&self) -> Vec<&[u8]> {
        self.column_info.column_names()
    }

    /// Pairs of column and value.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.column_info.columns.iter().zip(self.values.iter())
    }
}

//! The `DataFrame` container (spec §3 "DataFrame", §4.1).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::column::{Column, ColumnData, ColumnRole};
use crate::error::{RelboostError, Result};

static CHANGE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_change_stamp() -> u64 {
    CHANGE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One entry of [`DataFrame::to_schema`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub role: String,
    pub unit: String,
    pub dtype: String,
}

/// A per-join-key index mapping encoded key id to the sorted set of row
/// positions that carry it.
pub type JoinKeyIndex = BTreeMap<i32, Vec<u32>>;

/// Ordered collection of [`Column`]s plus a per-join-key index.
///
/// Invariant: every column has the same row count as every other column
/// (unless the frame is empty); `last_change` strictly increases on any
/// mutation.
#[derive(Clone, Debug)]
pub struct DataFrame {
    name: String,
    columns: Vec<Column>,
    indices: std::collections::HashMap<String, JoinKeyIndex>,
    last_change: u64,
}

impl DataFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: std::collections::HashMap::new(),
            last_change: next_change_stamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_change(&self) -> u64 {
        self.last_change
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| RelboostError::not_found("column", name))
    }

    /// Getter by role and positional index among columns of that role, as
    /// described in spec §4.1 ("Getters by role+index and by name exist").
    pub fn nth_of_role(&self, role: ColumnRole, index: usize) -> Result<&Column> {
        self.columns
            .iter()
            .filter(|c| c.role == role)
            .nth(index)
            .ok_or_else(|| {
                RelboostError::not_found(
                    "column",
                    format!("{}[{}]", role.as_str(), index),
                )
            })
    }

    pub fn columns_with_role(&self, role: ColumnRole) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(move |c| c.role == role)
    }

    /// Adds (or replaces) a column, enforcing the row-count invariant.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() {
            column.check_row_count(self.nrows())?;
        }
        if let Some(slot) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *slot = column;
        } else {
            self.columns.push(column);
        }
        self.indices.clear();
        self.last_change = next_change_stamp();
        Ok(())
    }

    pub fn add_float_column(
        &mut self,
        name: impl Into<String>,
        role: ColumnRole,
        values: Vec<f64>,
    ) -> Result<()> {
        self.add_column(Column::new(name, role, ColumnData::Float64(values)))
    }

    pub fn add_int_column(
        &mut self,
        name: impl Into<String>,
        role: ColumnRole,
        values: Vec<i32>,
    ) -> Result<()> {
        self.add_column(Column::new(name, role, ColumnData::Int32(values)))
    }

    pub fn add_timestamp_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<()> {
        self.add_column(Column::new(
            name,
            ColumnRole::TimeStamp,
            ColumnData::TimeStampFloat(values),
        ))
    }

    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        let pos = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| RelboostError::not_found("column", name))?;
        self.indices.clear();
        self.last_change = next_change_stamp();
        Ok(self.columns.remove(pos))
    }

    /// Vertically concatenates `other` onto `self`. All columns must match
    /// by name and semantic type; row count may differ.
    pub fn append(&mut self, other: &DataFrame) -> Result<()> {
        if self.columns.len() != other.columns.len() {
            return Err(RelboostError::invalid(
                "append: frames have different numbers of columns",
            ));
        }
        for col in &mut self.columns {
            let rhs = other.column(&col.name)?;
            col.data = concat_column_data(&col.data, &rhs.data)?;
        }
        self.indices.clear();
        self.last_change = next_change_stamp();
        Ok(())
    }

    /// Returns a new frame containing only the rows selected by
    /// `permutation` (may reorder, duplicate, or drop rows).
    pub fn sort_by_key(&self, permutation: &[u32]) -> DataFrame {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                unit: c.unit.clone(),
                role: c.role,
                data: gather_column_data(&c.data, permutation),
                encoding: c.encoding.clone(),
            })
            .collect();
        DataFrame {
            name: self.name.clone(),
            columns,
            indices: std::collections::HashMap::new(),
            last_change: next_change_stamp(),
        }
    }

    /// Returns a new frame containing only the rows where `mask` is true.
    pub fn where_mask(&self, mask: &[bool]) -> DataFrame {
        let permutation: Vec<u32> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i as u32))
            .collect();
        self.sort_by_key(&permutation)
    }

    /// Rebuilds the per-join-key row-position index for every `JoinKey`
    /// column. Idempotent: calling twice in a row leaves the index
    /// unchanged, and it is unaffected by `clone`.
    pub fn create_indices(&mut self) {
        self.indices.clear();
        for col in &self.columns {
            if col.role != ColumnRole::JoinKey {
                continue;
            }
            let ColumnData::CategoryId(ids) = &col.data else {
                continue;
            };
            let mut index: JoinKeyIndex = BTreeMap::new();
            for (row, &id) in ids.iter().enumerate() {
                if id < 0 {
                    continue;
                }
                index.entry(id).or_default().push(row as u32);
            }
            self.indices.insert(col.name.clone(), index);
        }
    }

    pub fn index_for(&self, join_key_column: &str) -> Option<&JoinKeyIndex> {
        self.indices.get(join_key_column)
    }

    /// Clones the frame under a new name. Commutes with `create_indices`:
    /// whichever order the two are called in, the clone ends up with the
    /// same (possibly empty) index map as a direct second call would
    /// produce.
    pub fn clone_as(&self, new_name: impl Into<String>) -> DataFrame {
        DataFrame {
            name: new_name.into(),
            columns: self.columns.clone(),
            indices: self.indices.clone(),
            last_change: next_change_stamp(),
        }
    }

    pub fn to_schema(&self) -> Vec<ColumnSchema> {
        self.columns
            .iter()
            .map(|c| ColumnSchema {
                name: c.name.clone(),
                role: c.role.as_str().to_owned(),
                unit: c.unit.clone(),
                dtype: c.data.type_name().to_owned(),
            })
            .collect()
    }
}

fn gather_column_data(data: &ColumnData, permutation: &[u32]) -> ColumnData {
    match data {
        ColumnData::Float64(v) => {
            ColumnData::Float64(permutation.iter().map(|&i| v[i as usize]).collect())
        }
        ColumnData::Int32(v) => {
            ColumnData::Int32(permutation.iter().map(|&i| v[i as usize]).collect())
        }
        ColumnData::CategoryId(v) => {
            ColumnData::CategoryId(permutation.iter().map(|&i| v[i as usize]).collect())
        }
        ColumnData::TimeStampFloat(v) => {
            ColumnData::TimeStampFloat(permutation.iter().map(|&i| v[i as usize]).collect())
        }
        ColumnData::StringBag(v) => {
            ColumnData::StringBag(permutation.iter().map(|&i| v[i as usize].clone()).collect())
        }
    }
}

fn concat_column_data(a: &ColumnData, b: &ColumnData) -> Result<ColumnData> {
    match (a, b) {
        (ColumnData::Float64(x), ColumnData::Float64(y)) => {
            Ok(ColumnData::Float64(x.iter().chain(y).copied().collect()))
        }
        (ColumnData::Int32(x), ColumnData::Int32(y)) => {
            Ok(ColumnData::Int32(x.iter().chain(y).copied().collect()))
        }
        (ColumnData::CategoryId(x), ColumnData::CategoryId(y)) => {
            Ok(ColumnData::CategoryId(x.iter().chain(y).copied().collect()))
        }
        (ColumnData::TimeStampFloat(x), ColumnData::TimeStampFloat(y)) => Ok(
            ColumnData::TimeStampFloat(x.iter().chain(y).copied().collect()),
        ),
        (ColumnData::StringBag(x), ColumnData::StringBag(y)) => Ok(ColumnData::StringBag(
            x.iter().chain(y).cloned().collect(),
        )),
        _ => Err(RelboostError::invalid(
            "append: column type mismatch between frames",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::EncodingHandle;

    #[test]
    fn add_column_enforces_row_count() {
        let mut df = DataFrame::new("population");
        df.add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.0, 3.0])
            .unwrap();
        let err = df
            .add_float_column("y", ColumnRole::Numerical, vec![1.0, 2.0])
            .unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[test]
    fn create_indices_is_idempotent_and_commutes_with_clone() {
        let enc = EncodingHandle::new();
        let mut df = DataFrame::new("peripheral");
        let keys = vec![Some("a".to_owned()), Some("b".to_owned()), Some("a".to_owned())];
        df.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &keys, enc))
            .unwrap();

        df.create_indices();
        let once = df.index_for("jk").cloned();
        df.create_indices();
        let twice = df.index_for("jk").cloned();
        assert_eq!(once, twice);

        let cloned = df.clone_as("peripheral_copy");
        assert_eq!(cloned.index_for("jk").cloned(), once);
    }

    #[test]
    fn where_mask_filters_rows() {
        let mut df = DataFrame::new("population");
        df.add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.0, 3.0])
            .unwrap();
        let filtered = df.where_mask(&[true, false, true]);
        assert_eq!(filtered.nrows(), 2);
        let ColumnData::Float64(v) = &filtered.column("x").unwrap().data else {
            panic!()
        };
        assert_eq!(v, &[1.0, 3.0]);
    }

    #[test]
    fn append_concatenates_rows() {
        let mut a = DataFrame::new("a");
        a.add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.0])
            .unwrap();
        let mut b = DataFrame::new("b");
        b.add_float_column("x", ColumnRole::Numerical, vec![3.0])
            .unwrap();
        a.append(&b).unwrap();
        assert_eq!(a.nrows(), 3);
    }
}

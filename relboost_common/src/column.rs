//! Typed column store (spec §3 "Column", §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RelboostError, Result};

/// The role a column plays within a data frame. Roles partition the
/// columns of a frame; a column has exactly one role at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRole {
    JoinKey,
    TimeStamp,
    Categorical,
    Numerical,
    Discrete,
    Target,
    Text,
    Unused,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinKey => "join_key",
            Self::TimeStamp => "time_stamp",
            Self::Categorical => "categorical",
            Self::Numerical => "numerical",
            Self::Discrete => "discrete",
            Self::Target => "target",
            Self::Text => "text",
            Self::Unused => "unused",
        }
    }
}

/// A dictionary shared by every categorical / join-key column that draws
/// from the same universe of strings. Multiple `Column`s hold an
/// `Arc<RwLock<Encoding>>` to the same dictionary so that population and
/// peripheral frames agree on the integer representation of a given key.
#[derive(Debug, Default)]
pub struct Encoding {
    to_id: HashMap<String, i32>,
    to_str: Vec<String>,
}

impl Encoding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up (or creates) the integer id for `value`. NULL is never
    /// passed here; callers map `None` to `-1` directly.
    pub fn encode(&mut self, value: &str) -> i32 {
        if let Some(&id) = self.to_id.get(value) {
            return id;
        }
        let id = self.to_str.len() as i32;
        self.to_str.push(value.to_owned());
        self.to_id.insert(value.to_owned(), id);
        id
    }

    /// Looks up the id for `value` without creating a new entry.
    pub fn find(&self, value: &str) -> Option<i32> {
        self.to_id.get(value).copied()
    }

    pub fn decode(&self, id: i32) -> Option<&str> {
        if id < 0 {
            return None;
        }
        self.to_str.get(id as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_str.is_empty()
    }
}

/// A shared, thread-safe handle to an [`Encoding`]. Cloning is cheap (an
/// `Arc` bump); this is the "explicit handle" the design notes call for in
/// place of the original engine's process-wide global dictionary.
#[derive(Clone, Debug)]
pub struct EncodingHandle(Arc<RwLock<Encoding>>);

impl EncodingHandle {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(Encoding::new())))
    }

    pub fn encode(&self, value: &str) -> i32 {
        self.0.write().encode(value)
    }

    pub fn find(&self, value: &str) -> Option<i32> {
        self.0.read().find(value)
    }

    pub fn decode(&self, id: i32) -> Option<String> {
        self.0.read().decode(id).map(|s| s.to_owned())
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for EncodingHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The semantic payload of a column (spec §3: "Float64, Int32, CategoryId
/// (dictionary-encoded Int32, −1 = NULL), TimeStampFloat (seconds since
/// epoch), StringBag").
#[derive(Clone, Debug)]
pub enum ColumnData {
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    /// Dictionary-encoded; `-1` denotes NULL.
    CategoryId(Vec<i32>),
    /// Seconds since the Unix epoch.
    TimeStampFloat(Vec<f64>),
    StringBag(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float64(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::CategoryId(v) => v.len(),
            Self::TimeStampFloat(v) => v.len(),
            Self::StringBag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Float64(_) => "Float64",
            Self::Int32(_) => "Int32",
            Self::CategoryId(_) => "CategoryId",
            Self::TimeStampFloat(_) => "TimeStampFloat",
            Self::StringBag(_) => "StringBag",
        }
    }

    /// Returns the value at `row` as `f64`, the common numeric
    /// representation used by the split proposer and aggregation engine.
    /// `CategoryId` and `StringBag` do not have a meaningful numeric
    /// representation and return `None`.
    pub fn as_f64(&self, row: usize) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(v[row]),
            Self::Int32(v) => Some(v[row] as f64),
            Self::TimeStampFloat(v) => Some(v[row]),
            Self::CategoryId(_) | Self::StringBag(_) => None,
        }
    }

    /// Returns the category id at `row`, or `None` if this is not a
    /// category column or the value is NULL.
    pub fn as_category(&self, row: usize) -> Option<i32> {
        match self {
            Self::CategoryId(v) if v[row] >= 0 => Some(v[row]),
            _ => None,
        }
    }
}

/// A single typed, named column within a [`crate::dataframe::DataFrame`].
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub unit: String,
    pub role: ColumnRole,
    pub data: ColumnData,
    /// Present for `CategoryId` columns (categorical or join-key roles).
    pub encoding: Option<EncodingHandle>,
}

impl Column {
    pub fn new(name: impl Into<String>, role: ColumnRole, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            role,
            data,
            encoding: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingHandle) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Builds a `CategoryId` column from raw strings, encoding each value
    /// through `encoding` (shared with any sibling frame that must agree on
    /// the integer representation).
    pub fn from_strings(
        name: impl Into<String>,
        role: ColumnRole,
        values: &[Option<String>],
        encoding: EncodingHandle,
    ) -> Self {
        let ids = values
            .iter()
            .map(|v| match v {
                Some(s) => encoding.encode(s),
                None => -1,
            })
            .collect();
        Self {
            name: name.into(),
            unit: String::new(),
            role,
            data: ColumnData::CategoryId(ids),
            encoding: Some(encoding),
        }
    }

    pub fn check_row_count(&self, expected: usize) -> Result<()> {
        if self.len() != expected {
            return Err(RelboostError::invalid(format!(
                "column {:?} has {} rows, expected {}",
                self.name,
                self.len(),
                expected
            )));
        }
        Ok(())
    }
}

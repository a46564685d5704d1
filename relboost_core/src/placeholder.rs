//! Declarative data-model node describing population/peripheral joins
//! (spec §3 "Placeholder").

use relboost_common::{RelboostError, Result};
use serde::{Deserialize, Serialize};

/// Whether a peripheral is propositionalized by a learned tree ensemble or
/// by the fixed, non-learned fast-prop catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Propositionalization {
    FastProp,
    Tree,
}

/// One join-key pair: the population-side column name and the
/// peripheral-side column name that must agree under the shared encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKeyPair {
    pub population_column: String,
    pub peripheral_column: String,
}

/// Lower (and optional upper) time-stamp bound relating a population row's
/// time stamp to the window of eligible peripheral rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeStampBound {
    pub population_column: String,
    pub peripheral_column: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    pub name: String,
    pub join_keys_used: Vec<JoinKeyPair>,
    pub time_stamps_used: Option<TimeStampBound>,
    pub upper_time_stamps_used: Option<TimeStampBound>,
    pub allow_lagged_targets: bool,
    pub propositionalization: Propositionalization,
    pub children: Vec<Placeholder>,
}

impl Placeholder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join_keys_used: Vec::new(),
            time_stamps_used: None,
            upper_time_stamps_used: None,
            allow_lagged_targets: false,
            propositionalization: Propositionalization::Tree,
            children: Vec::new(),
        }
    }

    pub fn with_join_key(
        mut self,
        population_column: impl Into<String>,
        peripheral_column: impl Into<String>,
    ) -> Self {
        self.join_keys_used.push(JoinKeyPair {
            population_column: population_column.into(),
            peripheral_column: peripheral_column.into(),
        });
        self
    }

    pub fn with_time_stamp(
        mut self,
        population_column: impl Into<String>,
        peripheral_column: impl Into<String>,
    ) -> Self {
        self.time_stamps_used = Some(TimeStampBound {
            population_column: population_column.into(),
            peripheral_column: peripheral_column.into(),
        });
        self
    }

    pub fn with_child(mut self, child: Placeholder) -> Self {
        self.children.push(child);
        self
    }

    /// A placeholder whose own children are non-empty is a "snowflake" node
    /// and drives the sub-ensemble machinery in `ensemble.rs`.
    pub fn is_snowflake(&self) -> bool {
        !self.children.is_empty()
    }

    /// Rejects cycles. The source forbids them outright; we walk the tree
    /// checking for a name reappearing on the current path (self-joins are
    /// permitted, so repeated names elsewhere in the tree are fine).
    pub fn check_acyclic(&self) -> Result<()> {
        let mut path = Vec::new();
        self.check_acyclic_inner(&mut path)
    }

    fn check_acyclic_inner(&self, path: &mut Vec<String>) -> Result<()> {
        if path.contains(&self.name) {
            return Err(RelboostError::invalid(format!(
                "placeholder cycle detected at {:?}",
                self.name
            )));
        }
        path.push(self.name.clone());
        for child in &self.children {
            child.check_acyclic_inner(path)?;
        }
        path.pop();
        Ok(())
    }
}

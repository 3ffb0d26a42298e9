//! Process identity and closed membership.

use crate::error::{CausalError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

/// Name of a participating process, e.g. `P1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ProcessId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ProcessId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProcessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The fixed, totally-ordered set of processes known to everyone.
///
/// Position in the membership is the column of that process in every
/// vector clock and the row/column in every matrix clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    ids: Vec<ProcessId>,
    positions: HashMap<ProcessId, usize>,
}

impl Membership {
    /// Build a membership from process names in clock order.
    ///
    /// Rejects an empty list, empty names and duplicates.
    pub fn new<I, N>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let mut ids = Vec::new();
        let mut positions = HashMap::new();

        for name in names {
            let id = ProcessId::new(name);
            if id.as_str().trim().is_empty() {
                return Err(CausalError::Config("process name must not be empty".to_owned()));
            }
            if positions.insert(id.clone(), ids.len()).is_some() {
                return Err(CausalError::Config(format!("duplicate process `{id}`")));
            }
            ids.push(id);
        }

        if ids.is_empty() {
            return Err(CausalError::Config("membership must not be empty".to_owned()));
        }

        Ok(Self { ids, positions })
    }

    /// Position of a process, or `UnknownProcess`.
    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| CausalError::UnknownProcess(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn get(&self, index: usize) -> Option<&ProcessId> {
        self.ids.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

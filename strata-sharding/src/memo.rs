//! Process-local record of tables known to exist.

use std::collections::HashSet;
use std::sync::RwLock;
use strata_core::{StoreError, StrataError, StrataResult};

fn poisoned() -> StrataError {
    StoreError::Poisoned {
        guard: "table record memo".to_string(),
    }
    .into()
}

/// Append-only set of resolved table names confirmed to exist.
///
/// Entries are never removed for the life of the process; a table dropped
/// out of band is not noticed until restart.
#[derive(Debug, Default)]
pub struct TableRecordMemo {
    names: RwLock<HashSet<String>>,
}

impl TableRecordMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> StrataResult<bool> {
        let names = self.names.read().map_err(|_| poisoned())?;
        Ok(names.contains(name))
    }

    /// Record `name`; returns `true` if it was not already present.
    pub fn record(&self, name: impl Into<String>) -> StrataResult<bool> {
        let mut names = self.names.write().map_err(|_| poisoned())?;
        Ok(names.insert(name.into()))
    }

    pub fn len(&self) -> usize {
        self.names.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All recorded names, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .read()
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}

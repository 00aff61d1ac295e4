use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of one migration pass. Built incrementally, surfaced to the
/// operator once, then discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Records visited.
    pub processed: usize,
    /// Records rewritten and saved back.
    pub modified: usize,
    /// Attribute names (normalized) referenced by a form but absent from
    /// the account. May contain duplicates; display uses the deduped set.
    pub unresolved: Vec<String>,
}

impl MigrationReport {
    pub fn unresolved_set(&self) -> BTreeSet<String> {
        self.unresolved.iter().cloned().collect()
    }
}

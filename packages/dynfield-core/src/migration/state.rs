//! Migration states, reports and history entries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::FieldType;

use super::step::MigrationStep;

/// Shadow-table migration state.
///
/// `Planned → ShadowCreated → DataCopied → Swapped → IndexesRebuilt → Done`;
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    Planned,
    ShadowCreated,
    DataCopied,
    Swapped,
    IndexesRebuilt,
    Done,
    /// Entered when a step aborts. It never appears in a report: the
    /// returned error carries the last state reached before it, which is
    /// what decides between `MigrationFailed` and `MigrationFatal`.
    Failed,
}

impl MigrationState {
    /// Returns true once the shadow tables have replaced the originals.
    pub fn is_past_swap(self) -> bool {
        matches!(
            self,
            MigrationState::Swapped | MigrationState::IndexesRebuilt | MigrationState::Done
        )
    }
}

/// Applied migration step, as kept in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub step: MigrationStep,
    pub applied_at: DateTime<Utc>,
    pub fields_copied: usize,
    pub fields_rewritten: usize,
    pub records_copied: usize,
}

/// Outcome of a completed migration step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub name: String,
    pub state: MigrationState,
    /// States entered, in order
    pub transitions: Vec<MigrationState>,
    /// Type constraint after the step
    pub allowed_types: BTreeSet<FieldType>,
    pub fields_copied: usize,
    /// `page_type.name` of every definition whose type was rewritten
    pub rewritten: Vec<String>,
    pub records_copied: usize,
}

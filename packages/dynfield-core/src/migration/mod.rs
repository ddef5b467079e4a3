//! Shadow-table schema migration.
//!
//! A step runs under exclusive access to the store: empty shadow tables are
//! created with the new type constraint and column sets, every row is copied
//! across (rewriting declared types where the step asks for it), the copy is
//! verified against its source and only then swapped in. Failures before the
//! swap leave the original tables untouched; failures after it are fatal.

mod shadow;
mod state;
mod step;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::FieldError;
use crate::records::{RecordTable, RECORD_BASE_COLUMNS};
use crate::registry::validation::is_identifier;
use crate::registry::{ColumnDef, FieldDefinition, FieldTable, FieldType, FIELD_BASE_COLUMNS};
use crate::store::Store;

pub use state::{MigrationRecord, MigrationReport, MigrationState};
pub use step::{MigrationStep, TypeRewrite};

/// Operator hook consulted on entry to every state after `Planned`.
///
/// Returning `Err(reason)` aborts the step.
pub type CheckpointGuard = Arc<dyn Fn(MigrationState, &MigrationPlan) -> Result<(), String> + Send + Sync>;

/// Validated migration step holding its scope in flight.
///
/// The scope is released when the plan is dropped, whether or not it ran.
#[derive(Debug)]
pub struct MigrationPlan {
    step: MigrationStep,
    scope: String,
    allowed_types: BTreeSet<FieldType>,
    field_columns: Vec<ColumnDef>,
    record_columns: Vec<ColumnDef>,
    store: Arc<Store>,
}

impl MigrationPlan {
    pub fn step(&self) -> &MigrationStep {
        &self.step
    }

    /// Page type the step is confined to, or `*`.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Type constraint after the step.
    pub fn allowed_types(&self) -> &BTreeSet<FieldType> {
        &self.allowed_types
    }

    /// Full column set of the field-definition table after the step.
    pub fn field_columns(&self) -> &[ColumnDef] {
        &self.field_columns
    }

    /// Full column set of the record table after the step.
    pub fn record_columns(&self) -> &[ColumnDef] {
        &self.record_columns
    }
}

impl Drop for MigrationPlan {
    fn drop(&mut self) {
        self.store.release_scope(&self.scope);
    }
}

/// Shadow tables populated and verified, ready to swap.
struct Prepared {
    fields: FieldTable,
    records: RecordTable,
    rewritten: Vec<String>,
}

/// Applies migration steps to the store.
#[derive(Clone)]
pub struct SchemaMigrator {
    store: Arc<Store>,
    guard: Option<CheckpointGuard>,
}

impl std::fmt::Debug for SchemaMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaMigrator")
            .field("store", &self.store)
            .field("guard", &self.guard.is_some())
            .finish()
    }
}

fn planning_error(step: &MigrationStep, reason: impl Into<String>) -> FieldError {
    FieldError::MigrationFailed {
        migration: step.name.clone(),
        state: MigrationState::Planned,
        reason: reason.into(),
    }
}

/// Appends `added` to `existing`, rejecting invalid or colliding names.
fn extend_columns(
    step: &MigrationStep,
    table: &str,
    base: &[&str],
    existing: &[ColumnDef],
    added: &[ColumnDef],
) -> Result<Vec<ColumnDef>, FieldError> {
    let mut columns = existing.to_vec();
    for column in added {
        if !is_identifier(&column.name) {
            return Err(planning_error(
                step,
                format!("column name '{}' for table '{}' is not an identifier", column.name, table),
            ));
        }
        let collides = base.contains(&column.name.as_str())
            || columns.iter().any(|c| c.name == column.name);
        if collides {
            return Err(planning_error(
                step,
                format!("column '{}' already exists in table '{}'", column.name, table),
            ));
        }
        columns.push(column.clone());
    }
    Ok(columns)
}

impl SchemaMigrator {
    /// Creates a migrator over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, guard: None }
    }

    /// Installs a checkpoint guard.
    pub fn with_guard(mut self, guard: CheckpointGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Validates a step and marks its scope in flight.
    ///
    /// # Arguments
    /// * `step` - Migration step to plan
    ///
    /// # Returns
    /// `Result<MigrationPlan, FieldError>`; `MigrationInProgress` if an
    /// overlapping step is already planned or running.
    pub fn plan(&self, step: MigrationStep) -> Result<MigrationPlan, FieldError> {
        let _shared = self.store.shared()?;

        if step.name.trim().is_empty() {
            return Err(planning_error(&step, "step name must not be empty"));
        }
        if step.is_empty() {
            return Err(planning_error(&step, "step changes nothing"));
        }
        if self
            .store
            .migration_history()?
            .iter()
            .any(|applied| applied.step.name == step.name)
        {
            return Err(planning_error(&step, "a step with this name was already applied"));
        }
        if matches!(step.page_type.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(planning_error(&step, "page type scope must not be empty"));
        }

        let fields = self.store.fields();
        let mut allowed_types = fields.allowed_types.clone();
        allowed_types.extend(step.add_types.iter().copied());
        for removed in &step.remove_types {
            allowed_types.remove(removed);
        }
        if allowed_types.is_empty() {
            return Err(planning_error(&step, "step would leave no allowed field type"));
        }

        for rewrite in &step.rewrites {
            if rewrite.from == rewrite.to {
                return Err(planning_error(
                    &step,
                    format!("rewrite of '{}' to itself", rewrite.from),
                ));
            }
            let structural = [FieldType::Select, FieldType::Calculated];
            if structural.contains(&rewrite.from) || structural.contains(&rewrite.to) {
                return Err(planning_error(
                    &step,
                    format!(
                        "rewrite '{}' -> '{}' involves a type with options or a formula",
                        rewrite.from, rewrite.to
                    ),
                ));
            }
            if !allowed_types.contains(&rewrite.to) {
                return Err(planning_error(
                    &step,
                    format!("rewrite target '{}' is not allowed after the step", rewrite.to),
                ));
            }
        }
        let sources: BTreeSet<FieldType> = step.rewrites.iter().map(|r| r.from).collect();
        if sources.len() != step.rewrites.len() {
            return Err(planning_error(&step, "a type is rewritten more than once"));
        }

        let field_columns = extend_columns(
            &step,
            shadow::FIELD_TABLE,
            &FIELD_BASE_COLUMNS,
            &fields.columns,
            &step.field_columns,
        )?;
        let record_columns = {
            let records = self
                .store
                .records()
                .read()
                .map_err(|_| FieldError::LockPoisoned)?;
            extend_columns(
                &step,
                shadow::RECORD_TABLE,
                &RECORD_BASE_COLUMNS,
                &records.columns,
                &step.record_columns,
            )?
        };

        let scope = match &step.page_type {
            Some(page_type) if step.is_rewrite_only() => page_type.clone(),
            _ => "*".to_string(),
        };
        self.store.claim_scope(&scope)?;

        tracing::info!(
            migration = %step.name,
            scope = %scope,
            allowed_types = ?allowed_types,
            "Migration planned"
        );

        Ok(MigrationPlan {
            step,
            scope,
            allowed_types,
            field_columns,
            record_columns,
            store: Arc::clone(&self.store),
        })
    }

    /// Consults the guard before entering `next`; a refusal is reported
    /// against `current`, the last state reached.
    fn checkpoint(
        &self,
        plan: &MigrationPlan,
        current: MigrationState,
        next: MigrationState,
    ) -> Result<(), FieldError> {
        tracing::info!(migration = %plan.step.name, state = ?next, "Migration entering state");
        match &self.guard {
            Some(guard) => (guard.as_ref())(next, plan).map_err(|reason| FieldError::MigrationFailed {
                migration: plan.step.name.clone(),
                state: current,
                reason: format!("checkpoint refused entering {:?}: {}", next, reason),
            }),
            None => Ok(()),
        }
    }

    /// Builds and verifies the shadow tables.
    ///
    /// `state` tracks the last state reached for error reporting.
    fn prepare(
        &self,
        plan: &MigrationPlan,
        source_fields: &FieldTable,
        source_records: &RecordTable,
        state: &mut MigrationState,
        transitions: &mut Vec<MigrationState>,
    ) -> Result<Prepared, FieldError> {
        if self
            .store
            .migration_history()?
            .iter()
            .any(|applied| applied.step.name == plan.step.name)
        {
            return Err(planning_error(&plan.step, "a step with this name was already applied"));
        }

        // Create empty shadows
        self.checkpoint(plan, *state, MigrationState::ShadowCreated)?;
        let mut fields = FieldTable::shadow(
            plan.allowed_types.clone(),
            plan.field_columns.clone(),
            source_fields.next_id,
        );
        let mut records = RecordTable::shadow(plan.record_columns.clone());
        *state = MigrationState::ShadowCreated;
        transitions.push(*state);

        // Copy rows
        self.checkpoint(plan, *state, MigrationState::DataCopied)?;
        let rewritten = shadow::copy_fields(&plan.step, source_fields, &mut fields);
        shadow::copy_records(source_records, &mut records);
        shadow::verify(
            &plan.step.name,
            *state,
            (source_fields, &fields),
            (source_records, &records),
        )?;
        *state = MigrationState::DataCopied;
        transitions.push(*state);

        Ok(Prepared {
            fields,
            records,
            rewritten,
        })
    }

    /// Runs a planned step to completion.
    ///
    /// Holds exclusive access to the store for the whole run.
    ///
    /// # Arguments
    /// * `plan` - Plan returned by [`SchemaMigrator::plan`]
    ///
    /// # Returns
    /// `Result<MigrationReport, FieldError>`; `MigrationFailed` or
    /// `MigrationRowCountMismatch` before the swap (originals untouched),
    /// `MigrationFatal` at or after it.
    pub fn run(&self, plan: MigrationPlan) -> Result<MigrationReport, FieldError> {
        let _exclusive = self.store.exclusive()?;
        let mut records = self
            .store
            .records()
            .write()
            .map_err(|_| FieldError::LockPoisoned)?;

        let name = plan.step.name.clone();
        let source_fields = self.store.fields();
        let mut state = MigrationState::Planned;
        let mut transitions = vec![state];

        let prepared = self
            .prepare(&plan, &source_fields, &records, &mut state, &mut transitions)
            .and_then(|prepared| {
                self.checkpoint(&plan, MigrationState::DataCopied, MigrationState::Swapped)?;
                Ok(prepared)
            });
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(Self::abort(&name, state, e)),
        };

        let fields_copied = prepared.fields.rows.len();
        let records_copied = prepared.records.rows.len();

        // Swap
        self.store.publish_fields(prepared.fields);
        *records = prepared.records;
        state = MigrationState::Swapped;
        transitions.push(state);
        tracing::warn!(
            migration = %name,
            rewritten = ?prepared.rewritten,
            "Shadow tables swapped in; the step can no longer be rolled back"
        );

        let finished = self.finish(
            &plan,
            &prepared.rewritten,
            (fields_copied, records_copied),
            &mut state,
            &mut transitions,
        );
        if let Err(e) = finished {
            return Err(Self::abort(&name, state, e));
        }

        tracing::info!(
            migration = %name,
            fields = fields_copied,
            records = records_copied,
            rewritten = prepared.rewritten.len(),
            "Migration done"
        );

        Ok(MigrationReport {
            name,
            state,
            transitions,
            allowed_types: plan.allowed_types.clone(),
            fields_copied,
            rewritten: prepared.rewritten,
            records_copied,
        })
    }

    /// Moves a step to `Failed` and classifies the error by the last state
    /// reached: recoverable before the swap, fatal at or after it.
    fn abort(name: &str, state: MigrationState, error: FieldError) -> FieldError {
        tracing::info!(migration = %name, from = ?state, state = ?MigrationState::Failed, "Migration entering state");

        if state.is_past_swap() {
            tracing::error!(migration = %name, ?state, "Migration failed after swap: {}", error);
            return FieldError::MigrationFatal {
                migration: name.to_string(),
                state,
                reason: error.to_string(),
            };
        }

        let error = match error {
            FieldError::MigrationFailed { .. } | FieldError::MigrationRowCountMismatch { .. } => error,
            other => FieldError::MigrationFailed {
                migration: name.to_string(),
                state,
                reason: other.to_string(),
            },
        };
        tracing::warn!(migration = %name, ?state, "Migration aborted, shadow discarded: {}", error);
        error
    }

    /// Post-swap phase: rebuild indexes, record history.
    fn finish(
        &self,
        plan: &MigrationPlan,
        rewritten: &[String],
        copied: (usize, usize),
        state: &mut MigrationState,
        transitions: &mut Vec<MigrationState>,
    ) -> Result<(), FieldError> {
        self.checkpoint(plan, *state, MigrationState::IndexesRebuilt)?;
        let mut table = (*self.store.fields()).clone();
        table.reindex()?;
        self.store.publish_fields(table);
        *state = MigrationState::IndexesRebuilt;
        transitions.push(*state);

        self.checkpoint(plan, *state, MigrationState::Done)?;
        self.store.push_history(MigrationRecord {
            step: plan.step.clone(),
            applied_at: Utc::now(),
            fields_copied: copied.0,
            fields_rewritten: rewritten.len(),
            records_copied: copied.1,
        })?;
        *state = MigrationState::Done;
        transitions.push(*state);
        Ok(())
    }

    /// Plans and runs a step.
    pub fn apply(&self, step: MigrationStep) -> Result<MigrationReport, FieldError> {
        let plan = self.plan(step)?;
        self.run(plan)
    }

    /// Applies the steps whose name is not yet in the history, in order.
    ///
    /// # Returns
    /// `Result<Vec<MigrationReport>, FieldError>` with a report per applied step.
    pub fn apply_pending(&self, steps: Vec<MigrationStep>) -> Result<Vec<MigrationReport>, FieldError> {
        let mut reports = Vec::new();
        for step in steps {
            let applied = self
                .store
                .migration_history()?
                .iter()
                .any(|record| record.step.name == step.name);
            if applied {
                tracing::debug!(migration = %step.name, "Migration already applied, skipping");
                continue;
            }
            reports.push(self.apply(step)?);
        }
        Ok(reports)
    }

    /// Returns the applied steps, oldest first.
    pub fn history(&self) -> Result<Vec<MigrationRecord>, FieldError> {
        self.store.migration_history()
    }

    /// Lists definitions whose type is outside the current constraint,
    /// ordered by page type and name.
    pub fn constraint_violations(&self) -> Result<Vec<FieldDefinition>, FieldError> {
        let _shared = self.store.shared()?;
        let table = self.store.fields();
        let mut violations: Vec<FieldDefinition> = table
            .rows
            .values()
            .filter(|f| !table.allowed_types.contains(&f.field_type))
            .cloned()
            .collect();
        violations.sort_by(|a, b| (&a.page_type, &a.name).cmp(&(&b.page_type, &b.name)));
        Ok(violations)
    }
}

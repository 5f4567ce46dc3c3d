//! Three-way reconciliation of an incoming batch against the registry
//!
//! Given every stored identifier (active or not) and one deduplicated batch,
//! the engine classifies each identifier:
//!
//! - in the batch, not stored: **insert** as active
//! - in the batch and stored: **refresh** when [`needs_refresh`] says so,
//!   otherwise **unchanged**
//! - stored and active, not in the batch: **deactivate** (soft delete)
//!
//! Planning is pure. Applying the plan isolates failures per identifier for
//! inserts and refreshes, and per group for the single bulk deactivation.
//! Nothing is ever deleted.

mod policy;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::db::RegistryStore;
use crate::error::{Error, Result};
use crate::models::{
    ConflictKind, Device, DeviceState, IncomingBatch, IncomingEntry, SyncConflict, SyncStats,
};

pub use policy::{needs_refresh, DateComparison};

/// Every identifier currently in the registry, active or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    states: HashMap<String, DeviceState>,
}

impl RegistrySnapshot {
    pub const fn from_states(states: HashMap<String, DeviceState>) -> Self {
        Self { states }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&DeviceState> {
        self.states.get(identifier)
    }

    pub fn all_identifiers(&self) -> HashSet<&str> {
        self.states.keys().map(String::as_str).collect()
    }

    pub fn active_identifiers(&self) -> HashSet<&str> {
        self.states
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(identifier, _)| identifier.as_str())
            .collect()
    }
}

/// Settings that shape a run's writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Category tag written on inserted records
    pub tag: String,
    pub comparison: DateComparison,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            comparison: DateComparison::default(),
        }
    }
}

/// Tag written on inserted records when none is configured.
pub const DEFAULT_TAG: &str = "device_feed";

/// Who writes, and when.
#[derive(Debug, Clone, Copy)]
pub struct MutationContext<'a> {
    pub actor: &'a str,
    pub tag: &'a str,
    pub now_ms: i64,
}

/// One identifier's classification, with the dates relevant to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub identifier: String,
    /// Incoming date for inserts/updates/unchanged, stored date for
    /// deactivations
    pub client_timestamp: Option<DateTime<FixedOffset>>,
    /// Stored date before an update
    pub previous_timestamp: Option<DateTime<FixedOffset>>,
    /// The record was inactive and the update reactivates it
    pub reactivated: bool,
}

impl DeviceOutcome {
    fn incoming(entry: &IncomingEntry, stored: Option<&DeviceState>) -> Self {
        Self {
            identifier: entry.identifier.clone(),
            client_timestamp: entry.client_timestamp,
            previous_timestamp: stored.and_then(|state| state.client_timestamp),
            reactivated: stored.is_some_and(|state| !state.active),
        }
    }
}

/// The writes one run intends to make.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub inserts: Vec<IncomingEntry>,
    pub refreshes: Vec<DeviceOutcome>,
    pub unchanged: Vec<DeviceOutcome>,
    /// Sorted by identifier
    pub deactivations: Vec<DeviceOutcome>,
    processed: usize,
    skipped: usize,
    duplicates: usize,
}

impl ReconciliationPlan {
    /// Whether applying the plan would write anything
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.refreshes.is_empty() && self.deactivations.is_empty()
    }
}

/// Classified outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub inserted: Vec<DeviceOutcome>,
    pub updated: Vec<DeviceOutcome>,
    pub unchanged: Vec<DeviceOutcome>,
    pub deactivated: Vec<DeviceOutcome>,
    pub conflicts: Vec<SyncConflict>,
    pub stats: SyncStats,
}

/// Classify a batch against the registry without writing.
pub fn plan(
    snapshot: &RegistrySnapshot,
    batch: &IncomingBatch,
    comparison: DateComparison,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan {
        processed: batch.len(),
        skipped: batch.skipped(),
        duplicates: batch.duplicates(),
        ..ReconciliationPlan::default()
    };

    for entry in batch.entries() {
        match snapshot.get(&entry.identifier) {
            None => plan.inserts.push(entry.clone()),
            Some(stored) => {
                let outcome = DeviceOutcome::incoming(entry, Some(stored));
                if needs_refresh(stored, entry.client_timestamp.as_ref(), comparison) {
                    plan.refreshes.push(outcome);
                } else {
                    plan.unchanged.push(outcome);
                }
            }
        }
    }

    let incoming = batch.identifiers();
    plan.deactivations = snapshot
        .states
        .iter()
        .filter(|(identifier, state)| state.active && !incoming.contains(identifier.as_str()))
        .map(|(identifier, state)| DeviceOutcome {
            identifier: identifier.clone(),
            client_timestamp: state.client_timestamp,
            previous_timestamp: None,
            reactivated: false,
        })
        .collect();
    plan.deactivations
        .sort_by(|a, b| a.identifier.cmp(&b.identifier));

    plan
}

/// Apply a plan, isolating failures.
///
/// Per-identifier insert/refresh failures and a failed bulk deactivation are
/// recorded as conflicts and never stop the run. A failure that rolled back
/// the store's transaction, and the final active count, are propagated.
pub fn apply<S: RegistryStore + ?Sized>(
    store: &S,
    plan: ReconciliationPlan,
    ctx: &MutationContext<'_>,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult {
        unchanged: plan.unchanged,
        ..ReconciliationResult::default()
    };

    for entry in plan.inserts {
        let device = Device::new(
            entry.identifier.as_str(),
            entry.client_timestamp,
            ctx.tag,
            ctx.actor,
            ctx.now_ms,
        );
        match store.insert(&device) {
            Ok(()) => {
                tracing::debug!("Inserted {}", entry.identifier);
                result.inserted.push(DeviceOutcome::incoming(&entry, None));
            }
            Err(error) => {
                let kind = if error.is_unique_violation() {
                    ConflictKind::DuplicateIdentifier
                } else {
                    ConflictKind::InsertFailed
                };
                tracing::warn!("Insert of {} failed: {error}", entry.identifier);
                ensure_transaction(store, &error)?;
                result.conflicts.push(SyncConflict::from_error(
                    Some(entry.identifier.as_str()),
                    kind,
                    &error,
                ));
            }
        }
    }

    for outcome in plan.refreshes {
        match store.refresh(
            &outcome.identifier,
            outcome.client_timestamp,
            ctx.actor,
            ctx.now_ms,
        ) {
            Ok(()) => {
                tracing::debug!(
                    "Refreshed {} (reactivated: {})",
                    outcome.identifier,
                    outcome.reactivated
                );
                result.updated.push(outcome);
            }
            Err(error) => {
                tracing::warn!("Update of {} failed: {error}", outcome.identifier);
                ensure_transaction(store, &error)?;
                result.conflicts.push(SyncConflict::from_error(
                    Some(outcome.identifier.as_str()),
                    ConflictKind::UpdateFailed,
                    &error,
                ));
            }
        }
    }

    if !plan.deactivations.is_empty() {
        let identifiers = plan
            .deactivations
            .iter()
            .map(|outcome| outcome.identifier.clone())
            .collect::<Vec<_>>();
        match store.deactivate(&identifiers, ctx.actor, ctx.now_ms) {
            Ok(changed) => {
                if changed != identifiers.len() {
                    tracing::debug!(
                        "Deactivation changed {changed} of {} planned rows",
                        identifiers.len()
                    );
                }
                result.deactivated = plan.deactivations;
            }
            Err(error) => {
                tracing::warn!(
                    "Bulk deactivation of {} identifiers failed: {error}",
                    identifiers.len()
                );
                ensure_transaction(store, &error)?;
                result.conflicts.push(SyncConflict::from_error(
                    None,
                    ConflictKind::DeactivationFailed,
                    &error,
                ));
            }
        }
    }

    result.stats = SyncStats {
        processed: plan.processed,
        inserted: result.inserted.len(),
        updated: result.updated.len(),
        unchanged: result.unchanged.len(),
        deactivated: result.deactivated.len(),
        conflicts: result.conflicts.len(),
        skipped: plan.skipped,
        duplicates: plan.duplicates,
        active_total: store.count_active()?,
    };

    Ok(result)
}

/// Stop the run when a failed write took the whole transaction with it;
/// later writes would otherwise land outside it.
fn ensure_transaction<S: RegistryStore + ?Sized>(store: &S, error: &Error) -> Result<()> {
    if store.transaction_lost() {
        return Err(Error::TransactionLost(error.to_string()));
    }
    Ok(())
}

/// Validate a run's inputs before any store access.
pub fn validate_run<'a>(batch: &IncomingBatch, actor: Option<&'a str>) -> Result<&'a str> {
    let actor = actor
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .ok_or(Error::MissingActor)?;
    if batch.is_empty() {
        return Err(Error::EmptyBatch);
    }
    Ok(actor)
}

/// Snapshot, plan and apply in one call.
///
/// Fails fast on a missing actor or an empty batch without touching the
/// store.
pub fn reconcile<S: RegistryStore + ?Sized>(
    store: &S,
    batch: &IncomingBatch,
    actor: Option<&str>,
    options: &ReconcileOptions,
    now_ms: i64,
) -> Result<ReconciliationResult> {
    let actor = validate_run(batch, actor)?;
    let snapshot = store.snapshot()?;
    let plan = plan(&snapshot, batch, options.comparison);

    tracing::debug!(
        "Plan: {} inserts, {} refreshes, {} unchanged, {} deactivations",
        plan.inserts.len(),
        plan.refreshes.len(),
        plan.unchanged.len(),
        plan.deactivations.len()
    );

    let ctx = MutationContext {
        actor,
        tag: &options.tag,
        now_ms,
    };
    apply(store, plan, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    /// In-memory store with injectable failures.
    #[derive(Default)]
    struct MemoryStore {
        devices: RefCell<HashMap<String, Device>>,
        fail_insert: HashSet<String>,
        fail_refresh: HashSet<String>,
        fail_deactivate: bool,
        /// Identifiers another run inserted after our snapshot
        raced: HashSet<String>,
        calls: Cell<usize>,
    }

    impl MemoryStore {
        fn with(devices: &[(&str, Option<DateTime<FixedOffset>>, bool)]) -> Self {
            let store = Self::default();
            for (identifier, ts, active) in devices {
                let mut device = Device::new(*identifier, *ts, "seed", "seed", 0);
                device.active = *active;
                store
                    .devices
                    .borrow_mut()
                    .insert((*identifier).to_string(), device);
            }
            store
        }

        fn device(&self, identifier: &str) -> Device {
            self.devices.borrow()[identifier].clone()
        }

        fn failure() -> Error {
            Error::Database("disk I/O error".to_string())
        }

        fn unique_violation() -> Error {
            Error::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1555),
                Some("UNIQUE constraint failed: devices.identifier".to_string()),
            ))
        }
    }

    impl RegistryStore for MemoryStore {
        fn snapshot(&self) -> Result<RegistrySnapshot> {
            self.calls.set(self.calls.get() + 1);
            Ok(RegistrySnapshot::from_states(
                self.devices
                    .borrow()
                    .iter()
                    .map(|(id, device)| (id.clone(), device.state()))
                    .collect(),
            ))
        }

        fn insert(&self, device: &Device) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.raced.contains(&device.identifier) {
                return Err(Self::unique_violation());
            }
            if self.fail_insert.contains(&device.identifier) {
                return Err(Self::failure());
            }
            let mut devices = self.devices.borrow_mut();
            if devices.contains_key(&device.identifier) {
                return Err(Self::unique_violation());
            }
            devices.insert(device.identifier.clone(), device.clone());
            Ok(())
        }

        fn refresh(
            &self,
            identifier: &str,
            client_timestamp: Option<DateTime<FixedOffset>>,
            actor: &str,
            now_ms: i64,
        ) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_refresh.contains(identifier) {
                return Err(Self::failure());
            }
            let mut devices = self.devices.borrow_mut();
            let device = devices
                .get_mut(identifier)
                .ok_or_else(|| Error::NotFound(identifier.to_string()))?;
            device.client_timestamp = client_timestamp;
            device.active = true;
            device.updated_at = device.updated_at.max(now_ms);
            device.updated_by = Some(actor.to_string());
            Ok(())
        }

        fn deactivate(&self, identifiers: &[String], actor: &str, now_ms: i64) -> Result<usize> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_deactivate {
                return Err(Self::failure());
            }
            let mut devices = self.devices.borrow_mut();
            let mut changed = 0;
            for identifier in identifiers {
                if let Some(device) = devices.get_mut(identifier).filter(|d| d.active) {
                    device.active = false;
                    device.updated_at = device.updated_at.max(now_ms);
                    device.updated_by = Some(actor.to_string());
                    changed += 1;
                }
            }
            Ok(changed)
        }

        fn count_active(&self) -> Result<usize> {
            Ok(self.devices.borrow().values().filter(|d| d.active).count())
        }
    }

    fn day(d: u32) -> Option<DateTime<FixedOffset>> {
        FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, d, 0, 0, 0)
            .single()
    }

    fn batch(entries: &[(&str, Option<DateTime<FixedOffset>>)]) -> IncomingBatch {
        IncomingBatch::from_entries(
            entries
                .iter()
                .map(|(identifier, ts)| IncomingEntry::new(*identifier, *ts)),
        )
    }

    fn run(store: &MemoryStore, incoming: &IncomingBatch) -> ReconciliationResult {
        reconcile(
            store,
            incoming,
            Some("ops"),
            &ReconcileOptions::default(),
            1_000,
        )
        .unwrap()
    }

    fn ids(outcomes: &[DeviceOutcome]) -> Vec<&str> {
        outcomes.iter().map(|o| o.identifier.as_str()).collect()
    }

    #[test]
    fn scenario_a_empty_store_inserts_everything() {
        let store = MemoryStore::default();
        let result = run(&store, &batch(&[("111", day(1)), ("222", day(2))]));

        assert_eq!(result.stats.inserted, 2);
        assert_eq!(result.stats.updated, 0);
        assert_eq!(result.stats.deactivated, 0);
        assert_eq!(result.stats.unchanged, 0);
        assert_eq!(result.stats.active_total, 2);
        let device = store.device("111");
        assert_eq!(device.tag.as_deref(), Some(DEFAULT_TAG));
        assert_eq!(device.created_by.as_deref(), Some("ops"));
    }

    #[test]
    fn scenario_b_same_date_active_is_unchanged() {
        let store = MemoryStore::with(&[("111", day(1), true)]);
        let result = run(&store, &batch(&[("111", day(1))]));

        assert_eq!(result.stats.updated, 0);
        assert_eq!(result.stats.unchanged, 1);
        assert_eq!(store.device("111").updated_by.as_deref(), Some("seed"));
    }

    #[test]
    fn scenario_c_absent_active_identifier_is_deactivated() {
        let store = MemoryStore::with(&[("111", day(1), true), ("222", day(1), true)]);
        let result = run(&store, &batch(&[("111", day(1))]));

        assert_eq!(ids(&result.deactivated), vec!["222"]);
        assert_eq!(result.deactivated[0].client_timestamp, day(1));
        assert_eq!(result.stats.unchanged, 1);
        assert_eq!(result.stats.active_total, 1);
        assert!(!store.device("222").active);
    }

    #[test]
    fn scenario_d_inactive_identifier_is_reactivated_despite_same_date() {
        let store = MemoryStore::with(&[("111", day(1), false)]);
        let result = run(&store, &batch(&[("111", day(1))]));

        assert_eq!(result.stats.updated, 1);
        assert!(result.updated[0].reactivated);
        assert_eq!(result.stats.active_total, 1);
        assert!(store.device("111").active);
    }

    #[test]
    fn scenario_e_duplicate_identifier_applies_last_date_once() {
        let store = MemoryStore::default();
        let result = run(&store, &batch(&[("333", day(1)), ("333", day(9))]));

        assert_eq!(result.stats.inserted, 1);
        assert_eq!(result.stats.duplicates, 1);
        assert_eq!(store.device("333").client_timestamp, day(9));
    }

    #[test]
    fn already_inactive_absent_identifiers_are_left_untouched() {
        let store = MemoryStore::with(&[("111", day(1), true), ("222", day(1), false)]);
        let result = run(&store, &batch(&[("111", day(1))]));

        assert!(result.deactivated.is_empty());
        assert_eq!(store.device("222").updated_at, 0);
    }

    #[test]
    fn second_identical_run_is_idempotent() {
        let store = MemoryStore::with(&[("900", day(3), true), ("901", None, false)]);
        let incoming = batch(&[("111", day(1)), ("222", None), ("900", day(4)), ("901", day(5))]);

        let first = run(&store, &incoming);
        assert_eq!(first.stats.inserted, 2);
        assert_eq!(first.stats.updated, 2);

        let second = run(&store, &incoming);
        assert_eq!(second.stats.inserted, 0);
        assert_eq!(second.stats.deactivated, 0);
        assert_eq!(second.stats.updated, 0);
        assert_eq!(second.stats.unchanged, 4);
        assert_eq!(second.stats.active_total, first.stats.active_total);
    }

    #[test]
    fn classifications_partition_the_batch() {
        let store = MemoryStore::with(&[
            ("111", day(1), true),
            ("222", day(1), true),
            ("333", day(1), false),
            ("444", day(1), true),
        ]);
        let incoming = batch(&[("111", day(1)), ("222", day(2)), ("333", day(1)), ("555", None)]);
        let result = run(&store, &incoming);

        let mut classified: Vec<&str> = ids(&result.inserted);
        classified.extend(ids(&result.updated));
        classified.extend(ids(&result.unchanged));
        classified.sort_unstable();
        assert_eq!(classified, vec!["111", "222", "333", "555"]);
        assert_eq!(ids(&result.deactivated), vec!["444"]);
        assert_eq!(result.stats.processed, 4);
    }

    #[test]
    fn record_count_never_decreases() {
        let store = MemoryStore::with(&[("111", day(1), true), ("222", day(1), true)]);
        let before = store.devices.borrow().len();

        run(&store, &batch(&[("333", day(1))]));
        run(&store, &batch(&[("444", day(1))]));

        assert!(store.devices.borrow().len() >= before);
        assert_eq!(store.devices.borrow().len(), 4);
        assert_eq!(store.count_active().unwrap(), 1);
    }

    #[test]
    fn per_row_failures_are_isolated_as_conflicts() {
        let mut store = MemoryStore::with(&[("111", day(1), true)]);
        store.fail_insert.insert("222".to_string());
        store.fail_refresh.insert("111".to_string());

        let result = run(&store, &batch(&[("111", day(7)), ("222", day(1)), ("333", day(1))]));

        assert_eq!(ids(&result.inserted), vec!["333"]);
        assert!(result.updated.is_empty());
        assert_eq!(result.conflicts.len(), 2);
        let kinds = result
            .conflicts
            .iter()
            .map(|c| (c.identifier.as_deref(), c.kind))
            .collect::<Vec<_>>();
        assert!(kinds.contains(&(Some("222"), ConflictKind::InsertFailed)));
        assert!(kinds.contains(&(Some("111"), ConflictKind::UpdateFailed)));
        assert_eq!(result.stats.conflicts, 2);
        assert_eq!(result.stats.active_total, 2);
    }

    #[test]
    fn insert_race_is_recorded_as_duplicate_identifier() {
        let mut store = MemoryStore::default();
        store.raced.insert("111".to_string());

        let result = run(&store, &batch(&[("111", day(1)), ("222", day(1))]));

        assert_eq!(ids(&result.inserted), vec!["222"]);
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::DuplicateIdentifier);
        assert_eq!(conflict.identifier.as_deref(), Some("111"));
        assert!(conflict.code.as_deref().unwrap().contains("1555"));
    }

    #[test]
    fn failed_bulk_deactivation_is_one_group_conflict() {
        let mut store = MemoryStore::with(&[
            ("111", day(1), true),
            ("222", day(1), true),
            ("333", day(1), true),
        ]);
        store.fail_deactivate = true;

        let result = run(&store, &batch(&[("111", day(1)), ("444", day(1))]));

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].identifier, None);
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeactivationFailed);
        assert!(result.deactivated.is_empty());
        // the insert before the failing group step is kept
        assert_eq!(ids(&result.inserted), vec!["444"]);
        assert_eq!(result.stats.active_total, 4);
    }

    #[test]
    fn missing_actor_fails_before_touching_the_store() {
        let store = MemoryStore::default();
        let incoming = batch(&[("111", day(1))]);

        for actor in [None, Some("   ")] {
            let error = reconcile(&store, &incoming, actor, &ReconcileOptions::default(), 1)
                .unwrap_err();
            assert!(matches!(error, Error::MissingActor));
        }
        assert_eq!(store.calls.get(), 0);
    }

    #[test]
    fn empty_batch_fails_before_touching_the_store() {
        let store = MemoryStore::with(&[("111", day(1), true)]);
        let incoming = batch(&[("  ", day(1))]);

        let error =
            reconcile(&store, &incoming, Some("ops"), &ReconcileOptions::default(), 1).unwrap_err();

        assert!(matches!(error, Error::EmptyBatch));
        assert_eq!(store.calls.get(), 0);
        assert!(store.device("111").active);
    }

    #[test]
    fn plan_is_pure_and_sorted() {
        let mut states = HashMap::new();
        for identifier in ["b", "a", "c"] {
            states.insert(
                identifier.to_string(),
                DeviceState {
                    client_timestamp: None,
                    active: true,
                },
            );
        }
        let snapshot = RegistrySnapshot::from_states(states);

        let planned = plan(&snapshot, &batch(&[("z", None)]), DateComparison::Day);

        assert_eq!(ids(&planned.deactivations), vec!["a", "b", "c"]);
        assert_eq!(planned.inserts.len(), 1);
        assert!(!planned.is_noop());
        assert_eq!(snapshot.active_identifiers().len(), 3);
    }

    #[test]
    fn exact_comparison_refreshes_on_time_change() {
        let stored = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
            .single();
        let incoming = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
            .single();
        let store = MemoryStore::with(&[("111", stored, true)]);
        let options = ReconcileOptions {
            comparison: DateComparison::Exact,
            ..ReconcileOptions::default()
        };

        let result = reconcile(&store, &batch(&[("111", incoming)]), Some("ops"), &options, 1)
            .unwrap();

        assert_eq!(result.stats.updated, 1);
        assert_eq!(result.updated[0].previous_timestamp, stored);
    }
}

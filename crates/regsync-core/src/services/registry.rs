//! Registry service: one synchronization run per call, plus inspection reads.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    Database, RegistryStore, RunRepository, SqliteRegistryRepository, SqliteRunRepository,
    StoreConfig,
};
use crate::models::{
    ActivityFilter, Device, IncomingBatch, NotificationStatus, RegistryCounts, SyncRun,
};
use crate::reconcile::{self, ReconcileOptions, ReconciliationResult};
use crate::util::{normalize_text_option, now_millis};
use crate::Result;

/// Outcome of one committed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub run: SyncRun,
    pub result: ReconciliationResult,
    /// Whether the run made it into the history table
    pub recorded: bool,
}

/// Thread-safe service over the registry database.
#[derive(Clone)]
pub struct RegistryService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl RegistryService {
    /// Open a registry service at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path, config)?;
        tracing::debug!("Opened registry at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory registry service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Reconcile one batch inside a single write transaction.
    ///
    /// A missing actor or an empty batch fails before the store is touched.
    /// Any other error before commit rolls the whole run back. Per-row and
    /// group conflicts are part of the committed result.
    pub async fn sync_batch(
        &self,
        batch: &IncomingBatch,
        actor: Option<&str>,
        options: &ReconcileOptions,
        source: Option<&str>,
    ) -> Result<SyncOutcome> {
        let actor = reconcile::validate_run(batch, actor)?;
        let started_at = now_millis();

        let mut db = self.db.lock().await;
        let tx = db.begin_run()?;

        let result = {
            let store = SqliteRegistryRepository::new(&tx);
            reconcile::reconcile(&store, batch, Some(actor), options, started_at)?
        };

        let run = SyncRun {
            id: Uuid::now_v7().to_string(),
            source: normalize_text_option(source.map(str::to_string)),
            actor: actor.to_string(),
            started_at,
            finished_at: now_millis(),
            stats: result.stats,
            notification: NotificationStatus::Pending,
        };

        let recorded = match SqliteRunRepository::new(&tx).record(&run) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!("Failed to record run {}: {error}", run.id);
                false
            }
        };

        tx.commit()?;

        let stats = &run.stats;
        tracing::info!(
            "Run {} by {}: {} processed, {} inserted, {} updated, {} unchanged, {} deactivated, {} conflicts, {} active",
            run.id,
            run.actor,
            stats.processed,
            stats.inserted,
            stats.updated,
            stats.unchanged,
            stats.deactivated,
            stats.conflicts,
            stats.active_total
        );

        Ok(SyncOutcome {
            run,
            result,
            recorded,
        })
    }

    /// Record the delivery state of a run's notification.
    pub async fn set_notification(&self, run_id: &str, status: &NotificationStatus) -> Result<()> {
        let db = self.db.lock().await;
        SqliteRunRepository::new(db.connection()).set_notification(run_id, status)
    }

    pub async fn get_device(&self, identifier: &str) -> Result<Option<Device>> {
        let db = self.db.lock().await;
        SqliteRegistryRepository::new(db.connection()).get(identifier.trim())
    }

    pub async fn list_devices(
        &self,
        filter: ActivityFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Device>> {
        let db = self.db.lock().await;
        SqliteRegistryRepository::new(db.connection()).list(filter, limit, offset)
    }

    pub async fn counts(&self) -> Result<RegistryCounts> {
        let db = self.db.lock().await;
        SqliteRegistryRepository::new(db.connection()).counts()
    }

    pub async fn count_active(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRegistryRepository::new(db.connection()).count_active()
    }

    /// List recorded runs, newest first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let db = self.db.lock().await;
        SqliteRunRepository::new(db.connection()).list(limit)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<SyncRun>> {
        let db = self.db.lock().await;
        SqliteRunRepository::new(db.connection()).get(run_id)
    }

    pub async fn last_run(&self) -> Result<Option<SyncRun>> {
        Ok(self.list_runs(1).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictKind, IncomingEntry};
    use crate::Error;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> Option<DateTime<FixedOffset>> {
        FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, d, 10, 0, 0)
            .single()
    }

    fn batch(entries: &[(&str, Option<DateTime<FixedOffset>>)]) -> IncomingBatch {
        IncomingBatch::from_entries(
            entries
                .iter()
                .map(|(identifier, ts)| IncomingEntry::new(*identifier, *ts)),
        )
    }

    async fn sync(service: &RegistryService, incoming: &IncomingBatch) -> SyncOutcome {
        service
            .sync_batch(incoming, Some("ops"), &ReconcileOptions::default(), Some("feed.tsv"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn scenario_a_inserts_into_empty_registry() {
        let service = RegistryService::open_in_memory().unwrap();

        let outcome = sync(&service, &batch(&[("111", day(1)), ("222", day(2))])).await;

        let stats = outcome.run.stats;
        assert_eq!(
            (stats.inserted, stats.updated, stats.deactivated, stats.unchanged),
            (2, 0, 0, 0)
        );
        assert_eq!(stats.active_total, 2);
        assert!(outcome.recorded);
    }

    #[tokio::test]
    async fn scenarios_b_c_d_against_sqlite() {
        let service = RegistryService::open_in_memory().unwrap();
        sync(&service, &batch(&[("111", day(1)), ("222", day(1))])).await;

        // C: "222" disappears
        let outcome = sync(&service, &batch(&[("111", day(1))])).await;
        assert_eq!(outcome.run.stats.deactivated, 1);
        assert_eq!(outcome.run.stats.unchanged, 1);
        assert_eq!(outcome.run.stats.active_total, 1);

        // B: same date, already active
        let outcome = sync(&service, &batch(&[("111", day(1))])).await;
        assert_eq!(outcome.run.stats.updated, 0);
        assert_eq!(outcome.run.stats.unchanged, 1);

        // D: "222" reappears with its old date
        let outcome = sync(&service, &batch(&[("111", day(1)), ("222", day(1))])).await;
        assert_eq!(outcome.run.stats.updated, 1);
        assert!(outcome.result.updated[0].reactivated);
        assert_eq!(outcome.run.stats.active_total, 2);

        let device = service.get_device("222").await.unwrap().unwrap();
        assert!(device.active);
        assert_eq!(device.tag.as_deref(), Some(reconcile::DEFAULT_TAG));
    }

    async fn install_trigger(service: &RegistryService, sql: &str) {
        service
            .db
            .lock()
            .await
            .connection()
            .execute_batch(sql)
            .unwrap();
    }

    #[tokio::test]
    async fn row_failure_inside_run_commits_sibling_rows() {
        let service = RegistryService::open_in_memory().unwrap();
        install_trigger(
            &service,
            "CREATE TRIGGER reject_222 BEFORE INSERT ON devices WHEN NEW.identifier = '222'
             BEGIN SELECT RAISE(ABORT, 'rejected by relay'); END;",
        )
        .await;

        let outcome = sync(
            &service,
            &batch(&[("111", day(1)), ("222", day(1)), ("333", day(1))]),
        )
        .await;

        assert_eq!(outcome.run.stats.inserted, 2);
        assert_eq!(outcome.result.conflicts.len(), 1);
        let conflict = &outcome.result.conflicts[0];
        assert_eq!(conflict.identifier.as_deref(), Some("222"));
        assert_eq!(conflict.kind, ConflictKind::InsertFailed);
        assert!(outcome.recorded);

        assert_eq!(service.count_active().await.unwrap(), 2);
        assert!(service.get_device("333").await.unwrap().is_some());
        assert!(service.get_device("222").await.unwrap().is_none());
        assert_eq!(service.list_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_rollback_mid_run_fails_without_partial_writes() {
        let service = RegistryService::open_in_memory().unwrap();
        install_trigger(
            &service,
            "CREATE TRIGGER rollback_222 BEFORE INSERT ON devices WHEN NEW.identifier = '222'
             BEGIN SELECT RAISE(ROLLBACK, 'store gave up'); END;",
        )
        .await;

        let error = service
            .sync_batch(
                &batch(&[("111", day(1)), ("222", day(1)), ("333", day(1))]),
                Some("ops"),
                &ReconcileOptions::default(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, Error::TransactionLost(_)));
        assert_eq!(service.counts().await.unwrap().total(), 0);
        assert!(service.list_runs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_e_duplicate_applies_last_date() {
        let service = RegistryService::open_in_memory().unwrap();

        let outcome = sync(&service, &batch(&[("333", day(1)), ("333", day(5))])).await;

        assert_eq!(outcome.run.stats.inserted, 1);
        assert_eq!(outcome.run.stats.duplicates, 1);
        let device = service.get_device("333").await.unwrap().unwrap();
        assert_eq!(device.client_timestamp, day(5));
    }

    #[tokio::test]
    async fn same_day_different_time_is_unchanged() {
        let service = RegistryService::open_in_memory().unwrap();
        sync(&service, &batch(&[("111", day(1))])).await;

        let later_same_day = day(1).map(|d| d + chrono::Duration::hours(5));
        let outcome = sync(&service, &batch(&[("111", later_same_day)])).await;

        assert_eq!(outcome.run.stats.unchanged, 1);
        assert_eq!(outcome.run.stats.updated, 0);
    }

    #[tokio::test]
    async fn repeated_batch_is_idempotent_and_never_deletes() {
        let service = RegistryService::open_in_memory().unwrap();
        let incoming = batch(&[("111", day(1)), ("222", None), ("333", day(3))]);

        let first = sync(&service, &incoming).await;
        let second = sync(&service, &incoming).await;

        assert_eq!(second.run.stats.inserted, 0);
        assert_eq!(second.run.stats.deactivated, 0);
        assert_eq!(second.run.stats.updated, 0);
        assert_eq!(second.run.stats.unchanged, 3);
        assert_eq!(second.run.stats.active_total, first.run.stats.active_total);

        sync(&service, &batch(&[("444", day(4))])).await;
        let counts = service.counts().await.unwrap();
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.inactive, 3);
    }

    #[tokio::test]
    async fn fail_fast_writes_nothing() {
        let service = RegistryService::open_in_memory().unwrap();
        sync(&service, &batch(&[("111", day(1))])).await;

        let error = service
            .sync_batch(
                &batch(&[("222", day(1))]),
                None,
                &ReconcileOptions::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::MissingActor));

        let error = service
            .sync_batch(
                &IncomingBatch::default(),
                Some("ops"),
                &ReconcileOptions::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::EmptyBatch));

        assert_eq!(service.count_active().await.unwrap(), 1);
        assert_eq!(service.list_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn runs_are_recorded_newest_first() {
        let service = RegistryService::open_in_memory().unwrap();
        let first = sync(&service, &batch(&[("111", day(1))])).await;
        let second = sync(&service, &batch(&[("222", day(1))])).await;

        let runs = service.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second.run.id);
        assert_eq!(runs[1].id, first.run.id);
        assert_eq!(runs[0].source.as_deref(), Some("feed.tsv"));
        assert_eq!(runs[0].notification, NotificationStatus::Pending);
        assert_eq!(service.last_run().await.unwrap(), Some(second.run));
    }

    #[tokio::test]
    async fn notification_status_is_updated() {
        let service = RegistryService::open_in_memory().unwrap();
        let outcome = sync(&service, &batch(&[("111", day(1))])).await;

        let status = NotificationStatus::Failed {
            reason: "HTTP 503".to_string(),
        };
        service
            .set_notification(&outcome.run.id, &status)
            .await
            .unwrap();

        let run = service.get_run(&outcome.run.id).await.unwrap().unwrap();
        assert_eq!(run.notification, status);

        let error = service
            .set_notification("missing", &NotificationStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn inspection_reads_filter_by_activity() {
        let service = RegistryService::open_in_memory().unwrap();
        sync(&service, &batch(&[("111", day(1)), ("222", day(1))])).await;
        sync(&service, &batch(&[("222", day(1))])).await;

        let active = service
            .list_devices(ActivityFilter::Active, 10, 0)
            .await
            .unwrap();
        let inactive = service
            .list_devices(ActivityFilter::Inactive, 10, 0)
            .await
            .unwrap();
        let all = service.list_devices(ActivityFilter::All, 10, 0).await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identifier, "222");
        assert_eq!(inactive[0].identifier, "111");
        assert_eq!(all.len(), 2);
        assert!(service.get_device("999").await.unwrap().is_none());
    }
}

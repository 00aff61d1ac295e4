//! Version-upgrade choreography. A version bump flags a pending
//! migration; the first trigger to win the time-boxed advisory lock runs
//! it, everyone else backs off. A crash leaves the lock to expire, after
//! which a retry is safe because the rewrite is idempotent per record.

use crate::report::MigrationReport;
use crate::store::{RecordStore, StoreError, TransientStore};
use crate::tree::TreeMigrator;
use brevo::cache::AttributeCache;
use semver::Version;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const CURRENT_VERSION: &str = "2.0.0";

const VERSION_KEY: &str = "schema_version";
const PENDING_KEY: &str = "migration_pending";
const RUNNING_KEY: &str = "migration_running";
const DONE_KEY: &str = "migration_done";

const PENDING_TTL: Duration = Duration::from_secs(60 * 60);
const LOCK_TTL: Duration = Duration::from_secs(5 * 60);
const DONE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const BATCH_SIZE: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("a migration run is already in progress")]
    LockContention,

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("stored schema version {0:?} is not a valid version")]
    InvalidVersion(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Unmigrated,
    Pending,
    Running,
    Migrated,
}

pub struct MigrationRunner {
    transients: Arc<dyn TransientStore>,
    records: Arc<dyn RecordStore>,
    cache: Arc<AttributeCache>,
    global_api_key: String,
}

impl MigrationRunner {
    pub fn new(
        transients: Arc<dyn TransientStore>,
        records: Arc<dyn RecordStore>,
        cache: Arc<AttributeCache>,
        global_api_key: &str,
    ) -> Self {
        MigrationRunner {
            transients,
            records,
            cache,
            global_api_key: global_api_key.to_string(),
        }
    }

    fn stored_version(&self) -> Result<Version, MigrationError> {
        let stored = self
            .transients
            .get(VERSION_KEY)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "0.0.0".to_string());
        Version::parse(&stored).map_err(|_| MigrationError::InvalidVersion(stored))
    }

    fn current_version() -> Version {
        Version::new(2, 0, 0)
    }

    /// Flag a pending migration when the stored schema version is behind.
    /// The stored version is bumped immediately so the check is cheap on
    /// every subsequent trigger.
    pub fn check_version(&self) -> Result<MigrationState, MigrationError> {
        let stored = self.stored_version()?;
        if stored < Self::current_version() {
            self.transients.set(
                PENDING_KEY,
                Value::String(stored.to_string()),
                Some(PENDING_TTL),
            );
            self.transients.set(
                VERSION_KEY,
                Value::String(CURRENT_VERSION.to_string()),
                None,
            );
            tracing::info!(from = %stored, to = CURRENT_VERSION, "migration scheduled");
            Ok(MigrationState::Pending)
        } else {
            Ok(MigrationState::Migrated)
        }
    }

    pub fn state(&self) -> MigrationState {
        if self.transients.get(RUNNING_KEY).is_some() {
            return MigrationState::Running;
        }
        if self.transients.get(PENDING_KEY).is_some() {
            return MigrationState::Pending;
        }
        match self.stored_version() {
            Ok(version) if version >= Self::current_version() => MigrationState::Migrated,
            _ => MigrationState::Unmigrated,
        }
    }

    /// Run the pending migration, if any. Returns `Ok(None)` when there
    /// is nothing to do and `Err(LockContention)` when another trigger
    /// already holds the lock.
    pub async fn run_deferred(&self) -> Result<Option<MigrationReport>, MigrationError> {
        let Some(pending) = self.transients.get(PENDING_KEY) else {
            return Ok(None);
        };
        let from = pending.as_str().unwrap_or("0.0.0").to_string();

        if !self.transients.acquire(RUNNING_KEY, LOCK_TTL) {
            tracing::debug!("migration already running, backing off");
            return Err(MigrationError::LockContention);
        }
        self.transients.delete(PENDING_KEY);

        let outcome = self.run_migrations(&from).await;
        self.transients.delete(RUNNING_KEY);
        let report = outcome?;

        metrics::counter!("migration.completed").increment(1);
        if let Ok(value) = serde_json::to_value(&report) {
            self.transients.set(DONE_KEY, value, Some(DONE_TTL));
        }
        Ok(Some(report))
    }

    /// One-shot completion notice for operator display; reading it
    /// clears it.
    pub fn take_done_notice(&self) -> Option<MigrationReport> {
        let value = self.transients.get(DONE_KEY)?;
        self.transients.delete(DONE_KEY);
        serde_json::from_value(value).ok()
    }

    async fn run_migrations(&self, from: &str) -> Result<MigrationReport, MigrationError> {
        let from = Version::parse(from).unwrap_or_else(|_| Version::new(0, 0, 0));
        let mut report = MigrationReport::default();

        if from < Version::new(2, 0, 0) {
            self.migrate_to_2_0_0(&mut report).await?;
        }

        Ok(report)
    }

    /// 2.0.0: attribute references moved to canonical upper-case names;
    /// every stored reference is normalized and checked against the
    /// account's attribute list.
    async fn migrate_to_2_0_0(&self, report: &mut MigrationReport) -> Result<(), MigrationError> {
        // Stale cached attributes would make every reference look
        // unresolved.
        self.cache.clear(None);

        let migrator = TreeMigrator::new(&self.cache, &self.global_api_key);
        let mut offset = 0;

        loop {
            let batch = self.records.list(BATCH_SIZE, offset).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            for id in batch {
                let mut tree = match self.records.load(&id).await {
                    Ok(tree) => tree,
                    Err(err) => {
                        tracing::warn!(record = %id, error = %err, "skipping unreadable record");
                        continue;
                    }
                };
                report.processed += 1;
                if migrator.migrate(&mut tree, report).await {
                    self.records.save(&id, &tree).await?;
                    report.modified += 1;
                }
            }

            if batch_len < BATCH_SIZE {
                break;
            }
            offset += BATCH_SIZE;
        }

        if !report.unresolved.is_empty() {
            tracing::warn!(
                unresolved = ?report.unresolved_set(),
                "attribute references not found in the account"
            );
        }
        tracing::info!(
            processed = report.processed,
            modified = report.modified,
            "migration to 2.0.0 finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRecordStore, MemoryTransientStore};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        transients: Arc<MemoryTransientStore>,
        records: Arc<MemoryRecordStore>,
        runner: MigrationRunner,
    }

    fn fixture(base_url: &str, global_api_key: &str) -> Fixture {
        let transients = Arc::new(MemoryTransientStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(AttributeCache::new(base_url));
        let runner = MigrationRunner::new(
            transients.clone(),
            records.clone(),
            cache,
            global_api_key,
        );
        Fixture {
            transients,
            records,
            runner,
        }
    }

    async fn mock_attributes(server: &MockServer, names: &[&str]) {
        let attributes: Vec<_> = names.iter().map(|n| json!({"name": n})).collect();
        Mock::given(method("GET"))
            .and(path("/v3/contacts/attributes"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"attributes": attributes})),
            )
            .mount(server)
            .await;
    }

    fn record_with_form(name_attr: &str) -> Value {
        json!([{
            "elType": "section",
            "elements": [{
                "widgetType": "form",
                "settings": {
                    "submit_actions": ["sendinblue integration"],
                    "sendinblue_use_global_api_key": "yes",
                    "sendinblue_name_attribute_field": name_attr,
                }
            }]
        }])
    }

    #[test]
    fn check_version_flags_pending_and_bumps_version() {
        let f = fixture("http://127.0.0.1:1", "");
        assert_eq!(f.runner.state(), MigrationState::Unmigrated);

        assert_eq!(f.runner.check_version().unwrap(), MigrationState::Pending);
        assert_eq!(f.runner.state(), MigrationState::Pending);
        assert_eq!(
            f.transients.get("schema_version"),
            Some(json!(CURRENT_VERSION))
        );

        // Pending flag survives, but the version check itself is settled.
        f.transients.delete("migration_pending");
        assert_eq!(f.runner.check_version().unwrap(), MigrationState::Migrated);
    }

    #[tokio::test]
    async fn run_deferred_without_pending_is_a_no_op() {
        let f = fixture("http://127.0.0.1:1", "");
        assert!(f.runner.run_deferred().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_run_rewrites_records_and_reports_unresolved() {
        let server = MockServer::start().await;
        mock_attributes(&server, &["FIRSTNAME"]).await;

        let f = fixture(&server.uri(), "site-key");
        f.records.insert("form-1", record_with_form(" firstname "));
        f.records.insert("form-2", record_with_form("ghost"));
        f.records.insert("plain", json!({"widgetType": "heading"}));

        f.runner.check_version().unwrap();
        let report = f.runner.run_deferred().await.unwrap().expect("report");

        assert_eq!(report.processed, 3);
        assert_eq!(report.modified, 2);
        assert_eq!(
            report.unresolved_set().into_iter().collect::<Vec<_>>(),
            ["GHOST"]
        );

        let saved = f.records.get("form-1").expect("record");
        assert_eq!(
            saved[0]["elements"][0]["settings"]["sendinblue_name_attribute_field"],
            "FIRSTNAME"
        );

        // Lock released, done notice stored exactly once.
        assert_eq!(f.runner.state(), MigrationState::Migrated);
        assert!(f.runner.take_done_notice().is_some());
        assert!(f.runner.take_done_notice().is_none());
    }

    #[tokio::test]
    async fn second_trigger_hits_lock_contention() {
        let f = fixture("http://127.0.0.1:1", "");
        f.runner.check_version().unwrap();

        // Simulate another trigger holding the lock.
        assert!(f.transients.acquire("migration_running", Duration::from_secs(300)));

        let err = f.runner.run_deferred().await.unwrap_err();
        assert!(matches!(err, MigrationError::LockContention));
        // The pending flag is untouched, so a retry is possible.
        assert_eq!(f.runner.state(), MigrationState::Running);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let server = MockServer::start().await;
        mock_attributes(&server, &["FIRSTNAME"]).await;

        let f = fixture(&server.uri(), "site-key");
        f.records.insert("form-1", record_with_form("firstname"));

        f.runner.check_version().unwrap();
        let first = f.runner.run_deferred().await.unwrap().expect("report");
        assert_eq!(first.modified, 1);

        // Force a second pass over the already-normalized records.
        f.transients
            .set("migration_pending", json!("1.0.0"), None);
        let second = f.runner.run_deferred().await.unwrap().expect("report");
        assert_eq!(second.modified, 0);
    }

    #[tokio::test]
    async fn fetch_failure_still_rewrites_without_warnings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/contacts/attributes"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), "site-key");
        f.records.insert("form-1", record_with_form("ghost"));

        f.runner.check_version().unwrap();
        let report = f.runner.run_deferred().await.unwrap().expect("report");
        assert_eq!(report.modified, 1);
        assert!(report.unresolved.is_empty());
    }
}

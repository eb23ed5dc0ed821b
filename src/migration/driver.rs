//! Sequential, checkpointed migration of the subscriber population.
//!
//! Subjects are processed one at a time in export order; the checkpoint file
//! is rewritten after every attempted subject, so killing the process at any
//! point leaves a valid resume point. A subject that exhausts its retries is
//! still marked processed: plain re-runs will not hammer a persistently
//! failing account, and `--force` is the deliberate reprocessing path.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::billing::validate::EntitlementClient;
use crate::migration::checkpoint::CheckpointStore;
use crate::migration::report::MigrationReport;
use crate::migration::retry::{linear_backoff, retry_with_backoff};
use crate::migration::subject::MigrationSubject;

pub const SKIP_ALREADY_PROCESSED: &str = "already_processed";

/// Seam over the remote mutation so tests script outcomes per subject.
#[async_trait::async_trait]
pub trait MigrationBackend: Send + Sync {
    async fn migrate(&self, subject: &MigrationSubject) -> Result<()>;
}

#[async_trait::async_trait]
impl MigrationBackend for EntitlementClient {
    async fn migrate(&self, subject: &MigrationSubject) -> Result<()> {
        self.migrate_subscription(subject).await
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Simulate: every step except the remote mutation, and the checkpoint
    /// file is never written.
    pub dry_run: bool,
    /// Reprocess subjects already present in the checkpoint.
    pub force: bool,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Delay after each successful migration; the downstream API is
    /// rate-sensitive.
    pub pacing: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            pacing: Duration::from_millis(300),
        }
    }
}

pub struct MigrationDriver<'a> {
    backend: &'a dyn MigrationBackend,
    store: &'a dyn CheckpointStore,
    options: DriverOptions,
}

impl<'a> MigrationDriver<'a> {
    pub fn new(
        backend: &'a dyn MigrationBackend,
        store: &'a dyn CheckpointStore,
        options: DriverOptions,
    ) -> Self {
        Self {
            backend,
            store,
            options,
        }
    }

    /// Run the batch. Per-subject failures land in the report; only a
    /// checkpoint persistence failure aborts, because continuing past one
    /// would break the crash-recovery contract.
    pub async fn run(&self, subjects: &[MigrationSubject]) -> Result<MigrationReport> {
        let mut processed: BTreeSet<String> = self.store.load()?;
        let mut report = MigrationReport::default();

        for subject in subjects {
            if processed.contains(&subject.user_id) && !self.options.force {
                info!(user_id = %subject.user_id, "skipped (already processed)");
                report.record_skip(&subject.user_id, SKIP_ALREADY_PROCESSED);
                continue;
            }

            let outcome = if self.options.dry_run {
                info!(user_id = %subject.user_id, "dry-run: would migrate");
                Ok(())
            } else {
                retry_with_backoff(
                    "migrate_subscription",
                    self.options.max_attempts,
                    linear_backoff(self.options.backoff_base),
                    || self.backend.migrate(subject),
                )
                .await
            };

            let succeeded = outcome.is_ok();
            match outcome {
                Ok(()) => {
                    if !self.options.dry_run {
                        info!(user_id = %subject.user_id, "migrated");
                    }
                    report.record_success(&subject.user_id);
                }
                Err(err) => {
                    error!(user_id = %subject.user_id, error = %err, "migration failed");
                    report.record_failure(&subject.user_id, format!("{err:#}"));
                }
            }

            // Processed means attempted, not succeeded; failed subjects are
            // only revisited under --force.
            processed.insert(subject.user_id.clone());
            if !self.options.dry_run {
                self.store
                    .save(&processed)
                    .with_context(|| format!("persisting checkpoint after {}", subject.user_id))?;
            }

            if succeeded && !self.options.pacing.is_zero() {
                tokio::time::sleep(self.options.pacing).await;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::checkpoint::InMemoryCheckpointStore;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn subject(id: &str) -> MigrationSubject {
        MigrationSubject {
            user_id: id.to_string(),
            product_id: "reelist_lifetime_premium".to_string(),
            purchase_token: format!("tok-{id}"),
        }
    }

    fn fast_options() -> DriverOptions {
        DriverOptions {
            backoff_base: Duration::ZERO,
            pacing: Duration::ZERO,
            ..DriverOptions::default()
        }
    }

    /// Scripted backend: fails each user id a configured number of times
    /// before succeeding, and counts every call.
    struct ScriptedBackend {
        failures_before_success: Mutex<std::collections::HashMap<String, u32>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn always_ok() -> Self {
            Self::with_failures(&[])
        }

        fn with_failures(plan: &[(&str, u32)]) -> Self {
            Self {
                failures_before_success: Mutex::new(
                    plan.iter()
                        .map(|(id, n)| (id.to_string(), *n))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MigrationBackend for ScriptedBackend {
        async fn migrate(&self, subject: &MigrationSubject) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut map = self.failures_before_success.lock().unwrap();
            match map.get_mut(&subject.user_id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(anyhow!("backend rejected {}", subject.user_id))
                }
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn migrates_every_subject_and_checkpoints_each() {
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::new();
        let driver = MigrationDriver::new(&backend, &store, fast_options());

        let report = driver.run(&[subject("u1"), subject("u2")]).await.unwrap();

        assert_eq!(report.succeeded, vec!["u1", "u2"]);
        assert!(report.failed.is_empty());
        assert_eq!(store.save_count(), 2);
        assert!(store.snapshot().contains("u1"));
        assert!(store.snapshot().contains("u2"));
    }

    #[tokio::test]
    async fn second_run_without_force_skips_everything() {
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::new();
        let subjects = [subject("u1"), subject("u2")];

        MigrationDriver::new(&backend, &store, fast_options())
            .run(&subjects)
            .await
            .unwrap();
        let calls_after_first = backend.call_count();

        let report = MigrationDriver::new(&backend, &store, fast_options())
            .run(&subjects)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), calls_after_first);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SKIP_ALREADY_PROCESSED));
    }

    #[tokio::test]
    async fn force_reprocesses_checkpointed_subjects() {
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::with_processed(["u1".to_string()]);
        let options = DriverOptions {
            force: true,
            ..fast_options()
        };

        let report = MigrationDriver::new(&backend, &store, options)
            .run(&[subject("u1")])
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["u1"]);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_succeed() {
        let backend = ScriptedBackend::with_failures(&[("u1", 2)]);
        let store = InMemoryCheckpointStore::new();

        let report = MigrationDriver::new(&backend, &store, fast_options())
            .run(&[subject("u1")])
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["u1"]);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_record_failure_and_still_checkpoint() {
        let backend = ScriptedBackend::with_failures(&[("u1", 10), ("u2", 0)]);
        let store = InMemoryCheckpointStore::new();

        let report = MigrationDriver::new(&backend, &store, fast_options())
            .run(&[subject("u1"), subject("u2")])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].user_id, "u1");
        assert!(report.failed[0].reason.contains("backend rejected u1"));
        assert_eq!(report.succeeded, vec!["u2"]);
        // Three attempts for u1, one for u2; both checkpointed.
        assert_eq!(backend.call_count(), 4);
        assert!(store.snapshot().contains("u1"));
        assert!(store.snapshot().contains("u2"));
    }

    #[tokio::test]
    async fn failed_subjects_are_not_retried_on_rerun_without_force() {
        let backend = ScriptedBackend::with_failures(&[("u1", 10)]);
        let store = InMemoryCheckpointStore::new();
        let subjects = [subject("u1")];

        MigrationDriver::new(&backend, &store, fast_options())
            .run(&subjects)
            .await
            .unwrap();
        let calls_after_first = backend.call_count();

        let report = MigrationDriver::new(&backend, &store, fast_options())
            .run(&subjects)
            .await
            .unwrap();

        assert_eq!(backend.call_count(), calls_after_first);
        assert_eq!(report.skipped[0].reason, SKIP_ALREADY_PROCESSED);
    }

    #[tokio::test]
    async fn resumes_after_the_last_checkpointed_subject() {
        // Simulate a crash after u1: checkpoint already holds it.
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::with_processed(["u1".to_string()]);

        let report = MigrationDriver::new(&backend, &store, fast_options())
            .run(&[subject("u1"), subject("u2"), subject("u3")])
            .await
            .unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.succeeded, vec!["u2", "u3"]);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn dry_run_never_calls_backend_or_persists() {
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::new();
        let options = DriverOptions {
            dry_run: true,
            ..fast_options()
        };

        let report = MigrationDriver::new(&backend, &store, options)
            .run(&[subject("u1"), subject("u2")])
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["u1", "u2"]);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(store.save_count(), 0);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn dry_run_still_skips_already_processed_subjects() {
        let backend = ScriptedBackend::always_ok();
        let store = InMemoryCheckpointStore::with_processed(["u1".to_string()]);
        let options = DriverOptions {
            dry_run: true,
            ..fast_options()
        };

        let report = MigrationDriver::new(&backend, &store, options)
            .run(&[subject("u1"), subject("u2")])
            .await
            .unwrap();

        assert_eq!(report.skipped[0].user_id, "u1");
        assert_eq!(report.succeeded, vec!["u2"]);
    }
}

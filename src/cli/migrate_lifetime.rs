//! Bulk migration of legacy lifetime subscribers to the new entitlement
//! backend. Resumable: progress is checkpointed after every subject, so a
//! killed run picks up where it left off.
//!
//! Operator note: a subject that fails after all retries is still marked
//! processed in the checkpoint. Plain re-runs skip it; pass `--force` to
//! reprocess failures deliberately.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::billing::validate::EntitlementClient;
use crate::migration::checkpoint::FileCheckpointStore;
use crate::migration::driver::{DriverOptions, MigrationDriver};
use crate::migration::report::MigrationReport;
use crate::migration::subject::load_subjects;
use crate::util::env as env_util;

pub const DEFAULT_CHECKPOINT_FILENAME: &str = "reelist-lifetime-migration-checkpoint.json";

#[derive(Debug, Clone, Default)]
pub struct MigrateLifetimeConfig {
    /// Simulate without the remote mutation; never writes the checkpoint.
    pub dry_run: bool,
    /// Reprocess subjects already present in the checkpoint.
    pub force: bool,
    /// Cap the exported population size.
    pub limit: Option<usize>,
    /// Override the checkpoint file location (defaults to the temp dir).
    pub checkpoint_path: Option<PathBuf>,
    /// Override the report file location (defaults to a timestamped name).
    pub output_path: Option<PathBuf>,
}

pub async fn run(cfg: MigrateLifetimeConfig) -> Result<()> {
    env_util::init_env();
    let started = Instant::now();

    let required: &[&str] = if cfg.dry_run {
        &[]
    } else {
        &["ENTITLEMENT_API_KEY"]
    };
    env_util::preflight_check(
        "migrate-lifetime",
        required,
        &[
            "ENTITLEMENT_API_KEY",
            "ENTITLEMENT_API_URL",
            "SUBSCRIBER_EXPORT_FILE",
        ],
    )?;

    let export_path = PathBuf::from(
        env_util::env_opt("SUBSCRIBER_EXPORT_FILE")
            .unwrap_or_else(|| "lifetime-subscribers.json".to_string()),
    );
    let subjects = load_subjects(&export_path, cfg.limit)?;
    info!(
        subjects = subjects.len(),
        export = %export_path.display(),
        dry_run = cfg.dry_run,
        force = cfg.force,
        "subscriber export loaded"
    );

    let client = EntitlementClient::new(
        env_util::env_opt("ENTITLEMENT_API_URL").as_deref(),
        Some(env_util::env_parse("ENTITLEMENT_API_TIMEOUT", 15u64)),
    )?
    .with_api_key(env_util::env_opt("ENTITLEMENT_API_KEY"));

    let checkpoint_path = cfg
        .checkpoint_path
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CHECKPOINT_FILENAME));
    let store = FileCheckpointStore::new(&checkpoint_path);

    let options = DriverOptions {
        dry_run: cfg.dry_run,
        force: cfg.force,
        max_attempts: env_util::env_parse("MIGRATE_MAX_ATTEMPTS", 3u32),
        backoff_base: Duration::from_millis(env_util::env_parse("MIGRATE_BACKOFF_MS", 1000u64)),
        pacing: Duration::from_millis(env_util::env_parse("MIGRATE_PACING_MS", 300u64)),
    };

    let driver = MigrationDriver::new(&client, &store, options);
    let report = driver.run(&subjects).await?;

    let output_path = cfg
        .output_path
        .unwrap_or_else(|| PathBuf::from(MigrationReport::default_filename(Utc::now())));
    report.write_to(&output_path)?;

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        dry_run = cfg.dry_run,
        checkpoint = %checkpoint_path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "migrate-lifetime: completed"
    );
    println!("Succeeded: {}", report.succeeded.len());
    println!("Failed: {}", report.failed.len());
    println!("Skipped: {}", report.skipped.len());
    println!("Report written to {}", output_path.display());

    Ok(())
}

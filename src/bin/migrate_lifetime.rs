use anyhow::Result;
use clap::Parser;
use reelist_billing::cli::migrate_lifetime::{run, MigrateLifetimeConfig};
use reelist_billing::util::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Migrate legacy lifetime subscribers to the new entitlement backend.
///
/// Progress is checkpointed after every subject, so interrupted runs resume
/// where they stopped. A subject that fails after all retries is still marked
/// processed; re-run with --force to reprocess failures.
#[derive(Parser, Debug)]
#[command(name = "migrate_lifetime", version, verbatim_doc_comment)]
struct Cli {
    /// Simulate without calling the remote backend (checkpoint is not written)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Reprocess subjects already present in the checkpoint
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Maximum number of subjects to migrate
    #[arg(long)]
    limit: Option<usize>,
    /// Override the checkpoint file location
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Override the report file location
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("migrate_lifetime");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();

    let cli = Cli::parse();
    run(MigrateLifetimeConfig {
        dry_run: cli.dry_run,
        force: cli.force,
        limit: cli.limit,
        checkpoint_path: cli.checkpoint,
        output_path: cli.output,
    })
    .await
}

//! Run outcome report: a write-once ops artifact, never read back by the tool.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipEntry {
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailureEntry>,
    pub skipped: Vec<SkipEntry>,
}

impl MigrationReport {
    pub fn record_success(&mut self, user_id: impl Into<String>) {
        self.succeeded.push(user_id.into());
    }

    pub fn record_failure(&mut self, user_id: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailureEntry {
            user_id: user_id.into(),
            reason: reason.into(),
        });
    }

    pub fn record_skip(&mut self, user_id: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkipEntry {
            user_id: user_id.into(),
            reason: reason.into(),
        });
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating report dir {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
            .with_context(|| format!("writing report {}", path.display()))
    }

    /// Default artifact name, timestamped so sequential ops runs do not
    /// clobber each other.
    pub fn default_filename(now: chrono::DateTime<chrono::Utc>) -> String {
        format!(
            "lifetime-migration-report-{}.json",
            now.format("%Y%m%d-%H%M%S")
        )
    }
}

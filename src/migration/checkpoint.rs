//! Durable migration progress: the set of user ids already attempted.
//!
//! The checkpoint is the only cross-run state in the system. It is rewritten
//! wholesale after every subject (never appended), so a reader always sees a
//! self-consistent full set even if the process is killed mid-run.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    processed_user_ids: BTreeSet<String>,
}

/// Injected storage seam so the driver never touches ambient file I/O and
/// tests can substitute an in-memory store.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<BTreeSet<String>>;
    fn save(&self, processed: &BTreeSet<String>) -> Result<()>;
}

/// File-backed store. Loads permissively (missing or corrupt file is an empty
/// set); saves with temp-file + fsync + atomic rename so a crash mid-write
/// never leaves a torn checkpoint.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<BTreeSet<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Ok(BTreeSet::new()),
        };
        match serde_json::from_str::<CheckpointFile>(&raw) {
            Ok(file) => Ok(file.processed_user_ids),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "checkpoint file unparsable; starting from an empty set"
                );
                Ok(BTreeSet::new())
            }
        }
    }

    fn save(&self, processed: &BTreeSet<String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating checkpoint dir {}", parent.display()))?;
            }
        }

        let body = serde_json::to_string_pretty(&CheckpointFile {
            processed_user_ids: processed.clone(),
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .with_context(|| format!("creating checkpoint temp {}", tmp_path.display()))?;
            tmp.write_all(body.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing checkpoint {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests and dry-run inspection.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    state: std::sync::Mutex<BTreeSet<String>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processed(ids: impl IntoIterator<Item = String>) -> Self {
        let store = Self::default();
        *store.state.lock().unwrap() = ids.into_iter().collect();
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().clone()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<BTreeSet<String>> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, processed: &BTreeSet<String>) -> Result<()> {
        *self.state.lock().unwrap() = processed.clone();
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

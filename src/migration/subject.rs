//! Subscriber export: the population of users eligible for migration.
//!
//! The export file is the authoritative "who is eligible" view; a partial or
//! unreadable export is fatal to the run, because silently truncating it would
//! exclude users from ever being considered.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Legacy SKUs eligible for lifetime migration.
pub const SUPPORTED_MIGRATION_PRODUCTS: &[&str] =
    &["reelist_lifetime_premium", "reelist_lifetime_premium_promo"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSubject {
    pub user_id: String,
    pub product_id: String,
    pub purchase_token: String,
}

fn field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn subject_from_row(raw: &Value) -> Option<MigrationSubject> {
    let product_id = field(raw, "productId")?;
    if !SUPPORTED_MIGRATION_PRODUCTS.contains(&product_id.as_str()) {
        return None;
    }
    Some(MigrationSubject {
        user_id: field(raw, "userId")?,
        // A subject without a token has nothing to migrate.
        purchase_token: field(raw, "purchaseToken")?,
        product_id,
    })
}

/// Load and filter the subscriber export. `limit` truncates after filtering.
pub fn load_subjects(path: &Path, limit: Option<usize>) -> Result<Vec<MigrationSubject>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading subscriber export {}", path.display()))?;
    let rows: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing subscriber export {}", path.display()))?;

    let mut subjects: Vec<MigrationSubject> =
        rows.iter().filter_map(subject_from_row).collect();
    if let Some(limit) = limit {
        subjects.truncate(limit);
    }
    Ok(subjects)
}

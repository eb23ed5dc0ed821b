//! Mapping of raw, source-specific purchase payloads into [`PurchaseRecord`]s.
//!
//! Sources disagree on field shapes (numeric vs. string dates, missing state
//! strings, integer tokens), so extraction is deliberately permissive: a weird
//! record is either coerced or dropped, never an error that fails the whole
//! reconciliation.

use serde_json::Value;

use crate::billing::record::{PurchaseRecord, PurchaseState};

fn value_as_string(v: &Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        return Some(s.to_string());
    }
    if let Some(n) = v.as_i64() {
        return Some(n.to_string());
    }
    None
}

fn value_as_epoch_ms(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return Some(f as i64);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<i64>().ok();
    }
    None
}

/// Normalize one raw purchase row. Returns `None` when the row is for a
/// different product or carries no usable purchase token.
pub fn normalize_record(raw: &Value, product_id: &str) -> Option<PurchaseRecord> {
    let record_product = raw.get("productId").and_then(value_as_string)?;
    if record_product != product_id {
        return None;
    }

    // A record without a token cannot be deduplicated or acted upon.
    let purchase_token = raw.get("purchaseToken").and_then(value_as_string)?;

    let state = raw
        .get("purchaseState")
        .and_then(|v| v.as_str())
        .map(PurchaseState::parse)
        .unwrap_or(PurchaseState::Unknown);

    let transaction_date_ms = raw
        .get("transactionDate")
        .and_then(value_as_epoch_ms)
        .unwrap_or(0);

    let transaction_id = raw.get("transactionId").and_then(value_as_string);

    Some(PurchaseRecord {
        product_id: record_product,
        purchase_token,
        state,
        transaction_date_ms,
        transaction_id,
    })
}

/// Normalize a batch of raw rows, keeping only valid records for `product_id`.
pub fn normalize_records(raw: &[Value], product_id: &str) -> Vec<PurchaseRecord> {
    raw.iter()
        .filter_map(|v| normalize_record(v, product_id))
        .collect()
}

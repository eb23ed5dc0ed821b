use serde::{Deserialize, Serialize};

/// Platform-reported lifecycle state of a purchase.
///
/// Anything a billing source reports that is not recognizably "purchased" or
/// "pending" is folded into `Unknown` rather than rejected; an ambiguous state
/// on a years-old record is still more likely a real purchase than a pending
/// one that may never complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseState {
    Purchased,
    Pending,
    Unknown,
}

impl PurchaseState {
    /// Ranking used when records for the same token conflict:
    /// purchased > unknown > pending.
    pub fn priority(self) -> u8 {
        match self {
            PurchaseState::Purchased => 3,
            PurchaseState::Unknown => 2,
            PurchaseState::Pending => 1,
        }
    }

    /// Case-insensitive, trimmed string match; unrecognized input is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "purchased" => PurchaseState::Purchased,
            "pending" => PurchaseState::Pending,
            _ => PurchaseState::Unknown,
        }
    }
}

/// One observed purchase as reported by a billing source, in canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub product_id: String,
    /// Opaque platform identifier; the natural dedup key. Never empty after
    /// normalization.
    pub purchase_token: String,
    pub state: PurchaseState,
    /// Epoch milliseconds; used only as a tie-break, never as primary ordering.
    pub transaction_date_ms: i64,
    /// Opaque platform transaction reference, informational only.
    pub transaction_id: Option<String>,
}

//! Purchase source adapter: acquires the billing connection, queries one or
//! more purchase-listing endpoints, and guarantees the connection is released
//! exactly once per successful init, on every exit path.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::billing::dedup::dedupe_and_rank;
use crate::billing::normalize::normalize_records;
use crate::billing::record::PurchaseRecord;

/// Device billing client seam. The primary source of truth: if
/// `active_purchases` fails, reconciliation for that user fails with it.
#[async_trait::async_trait]
pub trait BillingClient: Send + Sync {
    async fn init_connection(&self) -> Result<()>;
    async fn end_connection(&self) -> Result<()>;
    /// Currently active purchases, including suspended ones.
    async fn active_purchases(&self) -> Result<Vec<Value>>;
}

/// Optional platform capability (Android purchase history). Client builds
/// without it simply construct the adapter without attaching one; absence is
/// a type-level fact, not a runtime probe.
#[async_trait::async_trait]
pub trait PurchaseHistorySource: Send + Sync {
    async fn purchase_history(&self, include_suspended: bool) -> Result<Vec<Value>>;
}

pub struct PurchaseSourceAdapter {
    client: Arc<dyn BillingClient>,
    history: Option<Arc<dyn PurchaseHistorySource>>,
    product_id: String,
}

/// Legacy SKU whose purchases the restore path reconciles.
pub const DEFAULT_LEGACY_PRODUCT_ID: &str = "reelist_lifetime_premium";

impl PurchaseSourceAdapter {
    pub fn new(client: Arc<dyn BillingClient>, product_id: impl Into<String>) -> Self {
        Self {
            client,
            history: None,
            product_id: product_id.into(),
        }
    }

    /// Construct with the SKU from `LEGACY_PRODUCT_ID` (staging catalogs
    /// override it) or the production default.
    pub fn from_env(client: Arc<dyn BillingClient>) -> Self {
        let product_id = crate::util::env::env_opt("LEGACY_PRODUCT_ID")
            .unwrap_or_else(|| DEFAULT_LEGACY_PRODUCT_ID.to_string());
        Self::new(client, product_id)
    }

    /// Attach the optional historical-purchase capability.
    pub fn with_history_source(mut self, source: Arc<dyn PurchaseHistorySource>) -> Self {
        self.history = Some(source);
        self
    }

    /// All legacy lifetime purchase candidates for this user, deduplicated and
    /// ranked. The active-purchase query is fail-closed; the history query is
    /// a fail-open enrichment that degrades to an empty contribution.
    pub async fn find_legacy_lifetime_purchases(&self) -> Result<Vec<PurchaseRecord>> {
        self.client.init_connection().await?;
        let collected = self.collect_raw().await;
        // Release exactly once per successful init, even when collection
        // failed; a release error must not mask the collection error.
        if let Err(err) = self.client.end_connection().await {
            warn!(error = %err, "failed to end billing connection");
        }
        let raw = collected?;

        let normalized = normalize_records(&raw, &self.product_id);
        Ok(dedupe_and_rank(normalized))
    }

    /// "The" legacy purchase: the top-ranked candidate, or `None`.
    pub async fn find_legacy_lifetime_purchase(&self) -> Result<Option<PurchaseRecord>> {
        let mut candidates = self.find_legacy_lifetime_purchases().await?;
        Ok(if candidates.is_empty() {
            None
        } else {
            Some(candidates.remove(0))
        })
    }

    async fn collect_raw(&self) -> Result<Vec<Value>> {
        let mut raw = self.client.active_purchases().await?;

        match &self.history {
            Some(source) => match source.purchase_history(true).await {
                Ok(mut rows) => raw.append(&mut rows),
                Err(err) => {
                    warn!(error = %err, "purchase history lookup failed; continuing with active purchases only");
                }
            },
            None => {
                warn!("purchase history source unavailable on this client; skipping");
            }
        }

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::record::PurchaseState;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SKU: &str = "reelist_lifetime_premium";

    struct FakeBilling {
        active: Result<Vec<Value>, String>,
        init_calls: AtomicUsize,
        end_calls: AtomicUsize,
    }

    impl FakeBilling {
        fn ok(rows: Vec<Value>) -> Self {
            Self {
                active: Ok(rows),
                init_calls: AtomicUsize::new(0),
                end_calls: AtomicUsize::new(0),
            }
        }

        fn failing(msg: &str) -> Self {
            Self {
                active: Err(msg.to_string()),
                init_calls: AtomicUsize::new(0),
                end_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl BillingClient for FakeBilling {
        async fn init_connection(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn end_connection(&self) -> Result<()> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn active_purchases(&self) -> Result<Vec<Value>> {
            match &self.active {
                Ok(rows) => Ok(rows.clone()),
                Err(msg) => Err(anyhow!("{msg}")),
            }
        }
    }

    struct FakeHistory {
        rows: Result<Vec<Value>, String>,
    }

    #[async_trait::async_trait]
    impl PurchaseHistorySource for FakeHistory {
        async fn purchase_history(&self, _include_suspended: bool) -> Result<Vec<Value>> {
            match &self.rows {
                Ok(rows) => Ok(rows.clone()),
                Err(msg) => Err(anyhow!("{msg}")),
            }
        }
    }

    fn row(token: &str, state: &str, date: i64) -> Value {
        json!({
            "productId": SKU,
            "purchaseToken": token,
            "purchaseState": state,
            "transactionDate": date
        })
    }

    #[tokio::test]
    async fn merges_active_and_history_sources() {
        let billing = Arc::new(FakeBilling::ok(vec![
            row("A", "pending", 1900),
            row("A", "purchased", 1700),
        ]));
        let history = Arc::new(FakeHistory {
            rows: Ok(vec![row("A", "weird", 1800)]),
        });

        let adapter = PurchaseSourceAdapter::new(billing.clone(), SKU)
            .with_history_source(history);
        let best = adapter.find_legacy_lifetime_purchase().await.unwrap().unwrap();

        assert_eq!(best.state, PurchaseState::Purchased);
        assert_eq!(best.transaction_date_ms, 1700);
        assert_eq!(billing.end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_failure_degrades_to_active_only() {
        let billing = Arc::new(FakeBilling::ok(vec![row("A", "purchased", 1700)]));
        let history = Arc::new(FakeHistory {
            rows: Err("history API gone".to_string()),
        });

        let adapter = PurchaseSourceAdapter::new(billing.clone(), SKU)
            .with_history_source(history);
        let candidates = adapter.find_legacy_lifetime_purchases().await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].purchase_token, "A");
        assert_eq!(billing.end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_history_capability_is_not_an_error() {
        let billing = Arc::new(FakeBilling::ok(vec![row("A", "purchased", 1700)]));
        let adapter = PurchaseSourceAdapter::new(billing, SKU);
        let candidates = adapter.find_legacy_lifetime_purchases().await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn active_failure_propagates_and_still_releases_connection() {
        let billing = Arc::new(FakeBilling::failing("billing service unavailable"));
        let adapter = PurchaseSourceAdapter::new(billing.clone(), SKU);

        let err = adapter.find_legacy_lifetime_purchase().await.unwrap_err();
        assert!(err.to_string().contains("billing service unavailable"));
        assert_eq!(billing.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(billing.end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_sources_yield_no_candidate() {
        let billing = Arc::new(FakeBilling::ok(Vec::new()));
        let adapter = PurchaseSourceAdapter::new(billing, SKU);
        assert!(adapter.find_legacy_lifetime_purchase().await.unwrap().is_none());
    }
}

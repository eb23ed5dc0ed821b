use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::billing::record::PurchaseRecord;
use crate::migration::subject::MigrationSubject;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        s.truncate(max_len);
        s.push_str("…");
    }
    s
}

/// Synchronous verdict from the backend validation callable. Missing booleans
/// deserialize as false so a partial payload can never read as entitled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub entitlement_type: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct VerdictEnvelope {
    data: Option<ValidationVerdict>,
}

/// Client for the entitlement backend (validation + migration callables).
///
/// Callable endpoints:
/// - POST /validatePurchase - validate one purchase token, returns a verdict
/// - POST /migrateLifetimeSubscription - move one subscriber to the new backend
#[derive(Debug, Clone)]
pub struct EntitlementClient {
    base_url: String,
    http: Client,
    api_key: Option<String>,
}

impl EntitlementClient {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or("https://us-central1-reelist-prod.cloudfunctions.net")
            .trim_end_matches('/')
            .to_string();
        let timeout_secs = timeout_secs.unwrap_or(15);
        let http = Client::builder()
            .user_agent("ReelistEntitlement/1.0")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            http,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|s| !s.trim().is_empty());
        self
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Submit one purchase for validation and return the backend's verdict.
    pub async fn validate_purchase(
        &self,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<ValidationVerdict> {
        let url = format!("{}/validatePurchase", self.base_url);
        let req = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .json(&json!({
                "productId": product_id,
                "purchaseToken": purchase_token,
                "purchaseType": "in-app",
                "source": "restore",
            }));
        let resp = self.add_auth(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!(
                "purchase validation failed: {status} url={url} body={body}"
            ));
        }

        let envelope: VerdictEnvelope = resp.json().await?;
        envelope
            .data
            .ok_or_else(|| anyhow!("purchase validation response had no data payload"))
    }

    /// Restore a legacy lifetime entitlement from its top purchase candidate.
    /// Returns `Ok(true)` only when the backend confirms both success and
    /// premium; every other verdict is an error, so callers cannot mistake
    /// "no transport failure" for "entitled". Retrying is the caller's call.
    pub async fn restore_legacy_lifetime(&self, record: &PurchaseRecord) -> Result<bool> {
        let verdict = self
            .validate_purchase(&record.product_id, &record.purchase_token)
            .await?;
        if verdict.success && verdict.is_premium {
            Ok(true)
        } else {
            Err(anyhow!(
                "validation did not return premium success (success={}, isPremium={})",
                verdict.success,
                verdict.is_premium
            ))
        }
    }

    /// Move one subscriber onto the new billing backend. 2xx is success;
    /// anything else is an error for the migration driver's retry policy.
    pub async fn migrate_subscription(&self, subject: &MigrationSubject) -> Result<()> {
        let url = format!("{}/migrateLifetimeSubscription", self.base_url);
        let req = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .json(&json!({
                "userId": subject.user_id,
                "productId": subject.product_id,
                "purchaseToken": subject.purchase_token,
            }));
        let resp = self.add_auth(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!(
                "subscription migration failed: {status} url={url} body={body}"
            ));
        }
        Ok(())
    }
}

//! Operator notification
//!
//! The core hands a structured alert record to a notifier and ignores
//! delivery details; a failed notification is logged and never changes the
//! webhook response.

use crate::{EdrAlert, EnrichedIndicator, TriageResult};
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Downstream sink for triaged alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(
        &self,
        alert: &EdrAlert,
        indicators: &[EnrichedIndicator],
        triage: Option<&TriageResult>,
    ) -> Result<(), NotifyError>;
}

/// Notifier that POSTs the alert record as JSON to a configured webhook.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(
        &self,
        alert: &EdrAlert,
        indicators: &[EnrichedIndicator],
        triage: Option<&TriageResult>,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "alert": alert,
            "indicators": indicators,
            "triage": triage,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook returned status {}",
                response.status()
            )));
        }

        info!(alert_id = %alert.alert_id, "alert notification delivered");
        Ok(())
    }
}

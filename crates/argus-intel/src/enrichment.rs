//! Alert enrichment
//!
//! The system boundary for live traffic: catalog lookups for the query
//! endpoints, and the webhook flow that joins an EDR alert against the
//! catalog, drives triage, and hands the result to the notifier.
//!
//! A secondary failure never halts the pipeline here: a storage error
//! degrades an indicator to "not in database", an unavailable LLM leaves
//! the alert un-triaged, a failed notification only flips `notified`.

use crate::error::IntelError;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::repository::IocRepository;
use crate::triage::LlmTriager;
use crate::{EdrAlert, EnrichedIndicator, Ioc, ThreatContext, TriageResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Confirmed false positives at or above this confidence are suppressed
/// before notification.
const FP_SUPPRESS_CONFIDENCE: i32 = 80;

/// Aggregated view of every catalog sighting of one value.
#[derive(Debug, Clone, Serialize)]
pub struct SearchDetail {
    pub value: String,
    pub count: usize,
    pub overall_score: u32,
    pub all_tags: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub sightings: Vec<Ioc>,
}

/// Outcome of one webhook alert, echoed back to the EDR.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub alert_id: String,
    pub indicators_enriched: usize,
    pub indicators_in_db: usize,
    pub notified: bool,
    pub llm_triaged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_positive: Option<bool>,
}

/// Enrichment and triage front door.
pub struct EnrichmentHandler {
    repository: Arc<dyn IocRepository>,
    triager: Arc<LlmTriager>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Arc<Metrics>,
    query_timeout: Duration,
}

impl EnrichmentHandler {
    pub fn new(
        repository: Arc<dyn IocRepository>,
        triager: Arc<LlmTriager>,
        notifier: Option<Arc<dyn Notifier>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            triager,
            notifier,
            metrics,
            query_timeout: Duration::from_secs(5),
        }
    }

    /// Point lookup: any one catalog record for the value.
    pub async fn check(&self, value: &str) -> Result<Option<Ioc>, IntelError> {
        self.query(self.repository.find_by_value(value)).await
    }

    /// Versioned search with aggregation. `lodash@4.17.0` splits into name
    /// and version at the last `@`; a scoped `@org/pkg` alone carries none.
    pub async fn search(&self, value: &str) -> Result<SearchDetail, IntelError> {
        let (name, version) = split_package_spec(value);
        let sightings = if version.is_empty() {
            self.query(self.repository.find_all_by_value(name)).await?
        } else {
            self.query(self.repository.find_by_value_and_version(name, version))
                .await?
        };
        Ok(aggregate(value, sightings))
    }

    /// The webhook flow: join, triage, notify.
    pub async fn handle_alert(&self, alert: EdrAlert) -> WebhookOutcome {
        self.metrics.webhook_alerts.fetch_add(1, Ordering::Relaxed);

        let mut enriched = Vec::with_capacity(alert.indicators.len());
        for indicator in &alert.indicators {
            let rows = self.lookup_indicator(&indicator.value).await;
            enriched.push(EnrichedIndicator::from_rows(indicator, &rows));
        }

        let indicators_enriched = enriched.len();
        let indicators_in_db = enriched.iter().filter(|i| i.in_database).count();
        info!(
            alert_id = %alert.alert_id,
            indicators = indicators_enriched,
            in_database = indicators_in_db,
            "alert enriched"
        );

        let context = ThreatContext { alert, indicators: enriched };

        let mut triage: Option<TriageResult> = None;
        if self.triager.enabled() {
            match self.triager.triage(&context).await {
                Ok(result) => triage = Some(result),
                Err(err) => {
                    warn!(alert_id = %context.alert.alert_id, error = %err, "triage unavailable, continuing without it");
                }
            }
        }
        let llm_triaged = triage.is_some();

        if let Some(result) = &triage {
            if result.false_positive && result.confidence >= FP_SUPPRESS_CONFIDENCE {
                info!(
                    alert_id = %context.alert.alert_id,
                    confidence = result.confidence,
                    "false positive suppressed before notification"
                );
                return WebhookOutcome {
                    alert_id: context.alert.alert_id.clone(),
                    indicators_enriched,
                    indicators_in_db,
                    notified: false,
                    llm_triaged,
                    false_positive: Some(true),
                };
            }
        }

        let mut notified = false;
        if let Some(notifier) = &self.notifier {
            match notifier
                .notify(&context.alert, &context.indicators, triage.as_ref())
                .await
            {
                Ok(()) => notified = true,
                Err(err) => {
                    warn!(alert_id = %context.alert.alert_id, error = %err, "notifier delivery failed");
                    self.metrics.notifier_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        WebhookOutcome {
            alert_id: context.alert.alert_id.clone(),
            indicators_enriched,
            indicators_in_db,
            notified,
            llm_triaged,
            false_positive: triage.map(|t| t.false_positive),
        }
    }

    /// Exact match first, bounded substring scan as the fallback; storage
    /// trouble degrades to an empty result.
    async fn lookup_indicator(&self, value: &str) -> Vec<Ioc> {
        let rows = match self.query(self.repository.find_all_by_value(value)).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%value, error = %err, "catalog lookup failed, treating as no match");
                return Vec::new();
            }
        };
        if !rows.is_empty() {
            return rows;
        }
        match self.query(self.repository.find_containing(value)).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%value, error = %err, "catalog substring scan failed, treating as no match");
                Vec::new()
            }
        }
    }

    async fn query<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, IntelError>>,
    ) -> Result<T, IntelError> {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| IntelError::StorageUnavailable("catalog query timed out".to_string()))?
    }
}

/// Split `name@version` at the last `@`. A leading `@` alone is a scoped
/// package name, not a version separator.
pub fn split_package_spec(value: &str) -> (&str, &str) {
    match value.rfind('@') {
        Some(0) | None => (value, ""),
        Some(pos) => (&value[..pos], &value[pos + 1..]),
    }
}

/// Domain scoring over matching rows: more independent sightings, higher
/// score.
fn score(count: usize) -> u32 {
    match count {
        0 => 0,
        1 => 80,
        2 => 85,
        _ => 90,
    }
}

fn aggregate(value: &str, sightings: Vec<Ioc>) -> SearchDetail {
    let mut all_tags: Vec<String> = Vec::new();
    for row in &sightings {
        for tag in &row.tags {
            if !all_tags.contains(tag) {
                all_tags.push(tag.clone());
            }
        }
    }

    SearchDetail {
        value: value.to_string(),
        count: sightings.len(),
        overall_score: score(sightings.len()),
        all_tags,
        first_seen: sightings.iter().map(|s| s.first_seen).min(),
        last_seen: sightings.iter().map(|s| s.date_ingested).max(),
        sightings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::GuardrailConfig;
    use crate::notify::NotifyError;
    use crate::repository::MemoryIocRepository;
    use crate::resilience::{CircuitBreakerConfig, ResilientClient, RetryConfig};
    use crate::triage::{LlmConfig, LlmTriager};
    use crate::{AlertIndicator, IocType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct RecordingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), fail })
        }
        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }
        async fn notify(
            &self,
            _alert: &EdrAlert,
            _indicators: &[EnrichedIndicator],
            _triage: Option<&TriageResult>,
        ) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(NotifyError::Delivery("sink offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn triager(enabled: bool, metrics: Arc<Metrics>) -> Arc<LlmTriager> {
        let client = ResilientClient::new(
            RetryConfig { enabled: false, ..Default::default() },
            CircuitBreakerConfig { enabled: false, ..Default::default() },
            Duration::from_secs(1),
            metrics.clone(),
        );
        Arc::new(LlmTriager::new(
            LlmConfig {
                enabled,
                api_url: "http://llm.invalid/v1/chat/completions".to_string(),
                ..Default::default()
            },
            GuardrailConfig::default(),
            client,
            metrics,
        ))
    }

    fn handler(
        repository: Arc<MemoryIocRepository>,
        triage_enabled: bool,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> EnrichmentHandler {
        let metrics = Arc::new(Metrics::new());
        EnrichmentHandler::new(repository, triager(triage_enabled, metrics.clone()), notifier, metrics)
    }

    fn ioc(value: &str, ioc_type: IocType, source: &str, version: &str, threat_type: &str) -> Ioc {
        Ioc {
            value: value.to_string(),
            ioc_type,
            source: source.to_string(),
            threat_type: threat_type.to_string(),
            tags: vec![format!("{source}-tag")],
            version: version.to_string(),
            first_seen: Utc::now(),
            date_ingested: Utc::now(),
        }
    }

    fn alert(values: &[(&str, &str)]) -> EdrAlert {
        EdrAlert {
            alert_id: "alert-1".to_string(),
            threat_name: "Suspicious Connection".to_string(),
            indicators: values
                .iter()
                .map(|(tag, value)| AlertIndicator {
                    type_tag: tag.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_split_package_spec() {
        assert_eq!(split_package_spec("lodash@4.17.0"), ("lodash", "4.17.0"));
        assert_eq!(split_package_spec("lodash"), ("lodash", ""));
        assert_eq!(split_package_spec("@org/pkg"), ("@org/pkg", ""));
        assert_eq!(split_package_spec("@org/pkg@1.0.0"), ("@org/pkg", "1.0.0"));
    }

    #[tokio::test]
    async fn test_check_miss_is_not_an_error() {
        let handler = handler(Arc::new(MemoryIocRepository::new()), false, None);
        assert!(handler.check("203.0.113.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_versioned_includes_wildcard_rows() {
        let repository = Arc::new(MemoryIocRepository::new());
        repository
            .save_batch(&[
                ioc("lodash", IocType::Package, "osv", "", "supply_chain_malware"),
                ioc("lodash", IocType::Package, "osv-b", "4.17.0", "supply_chain_malware"),
                ioc("lodash", IocType::Package, "osv", "1.0.0", "supply_chain_malware"),
            ])
            .await
            .unwrap();

        let handler = handler(repository, false, None);
        let detail = handler.search("lodash@4.17.0").await.unwrap();
        assert_eq!(detail.count, 2);
        assert_eq!(detail.overall_score, 85);
        assert!(detail.all_tags.contains(&"osv-tag".to_string()));
        assert!(detail.first_seen.is_some());
        assert!(detail.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_search_unversioned_returns_all_rows() {
        let repository = Arc::new(MemoryIocRepository::new());
        repository
            .save_batch(&[
                ioc("lodash", IocType::Package, "a", "", ""),
                ioc("lodash", IocType::Package, "b", "4.17.0", ""),
                ioc("lodash", IocType::Package, "c", "4.17.1", ""),
            ])
            .await
            .unwrap();

        let handler = handler(repository, false, None);
        let detail = handler.search("lodash").await.unwrap();
        assert_eq!(detail.count, 3);
        assert_eq!(detail.overall_score, 90);
    }

    #[tokio::test]
    async fn test_webhook_no_match() {
        let notifier = RecordingNotifier::new(false);
        let handler = handler(Arc::new(MemoryIocRepository::new()), false, Some(notifier.clone()));

        let outcome = handler.handle_alert(alert(&[("IPV4", "203.0.113.9")])).await;
        assert_eq!(outcome.indicators_enriched, 1);
        assert_eq!(outcome.indicators_in_db, 0);
        assert!(!outcome.llm_triaged);
        assert!(outcome.notified);
        assert!(outcome.false_positive.is_none());
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_webhook_substring_fallback_matches_full_url() {
        let repository = Arc::new(MemoryIocRepository::new());
        repository
            .save_batch(&[ioc(
                "http://203.0.113.9/dropper.sh",
                IocType::Url,
                "urlhaus",
                "",
                "malware_download",
            )])
            .await
            .unwrap();

        let handler = handler(repository, false, None);
        let outcome = handler.handle_alert(alert(&[("IPV4", "203.0.113.9")])).await;
        assert_eq!(outcome.indicators_in_db, 1);
    }

    #[tokio::test]
    async fn test_webhook_suppresses_confident_false_positive() {
        // Benign-infrastructure alert: the pre-filter settles it as a
        // confident false positive and the notifier must stay silent.
        let notifier = RecordingNotifier::new(false);
        let handler = handler(
            Arc::new(MemoryIocRepository::new()),
            true,
            Some(notifier.clone()),
        );

        let outcome = handler
            .handle_alert(alert(&[("DOMAIN", "update.microsoft.com")]))
            .await;
        assert!(outcome.llm_triaged);
        assert_eq!(outcome.false_positive, Some(true));
        assert!(!outcome.notified);
        assert_eq!(notifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_webhook_known_bad_notifies_with_triage() {
        let repository = Arc::new(MemoryIocRepository::new());
        repository
            .save_batch(&[ioc("192.0.2.5", IocType::Ip, "feodo", "", "c2_server")])
            .await
            .unwrap();

        let notifier = RecordingNotifier::new(false);
        let handler = handler(repository, true, Some(notifier.clone()));

        let outcome = handler.handle_alert(alert(&[("IPV4", "192.0.2.5")])).await;
        assert!(outcome.llm_triaged);
        assert_eq!(outcome.false_positive, Some(false));
        assert!(outcome.notified);
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_webhook_notifier_failure_is_best_effort() {
        let notifier = RecordingNotifier::new(true);
        let handler = handler(Arc::new(MemoryIocRepository::new()), false, Some(notifier.clone()));

        let outcome = handler.handle_alert(alert(&[("IPV4", "203.0.113.9")])).await;
        assert!(!outcome.notified);
        assert_eq!(outcome.indicators_enriched, 1);
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_webhook_llm_failure_still_notifies() {
        // Triage enabled but the endpoint is unreachable: the alert goes to
        // the notifier un-triaged.
        let notifier = RecordingNotifier::new(false);
        let handler = handler(Arc::new(MemoryIocRepository::new()), true, Some(notifier.clone()));

        let outcome = handler.handle_alert(alert(&[("IPV4", "203.0.113.9")])).await;
        assert!(!outcome.llm_triaged);
        assert!(outcome.notified);
        assert!(outcome.false_positive.is_none());
        assert_eq!(notifier.calls(), 1);
    }
}

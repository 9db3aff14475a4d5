//! API Models

use argus_intel::enrichment::{SearchDetail, WebhookOutcome};
use argus_intel::Ioc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self { error: message.to_string() }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
}

/// One catalog record on the wire
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Sighting {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: String,
    pub source: String,
    pub threat_type: String,
    pub tags: Vec<String>,
    pub version: String,
    pub first_seen: DateTime<Utc>,
    pub date_ingested: DateTime<Utc>,
}

impl From<Ioc> for Sighting {
    fn from(ioc: Ioc) -> Self {
        Self {
            value: ioc.value,
            ioc_type: ioc.ioc_type.as_str().to_string(),
            source: ioc.source,
            threat_type: ioc.threat_type,
            tags: ioc.tags,
            version: ioc.version,
            first_seen: ioc.first_seen,
            date_ingested: ioc.date_ingested,
        }
    }
}

/// Response of the point lookup
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckResponse {
    pub exists: bool,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ioc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_ingested: Option<DateTime<Utc>>,
}

impl CheckResponse {
    pub fn miss(value: &str) -> Self {
        Self {
            exists: false,
            value: value.to_string(),
            ioc_type: None,
            source: None,
            threat_type: None,
            tags: None,
            version: None,
            first_seen: None,
            date_ingested: None,
        }
    }

    pub fn hit(ioc: Ioc) -> Self {
        Self {
            exists: true,
            value: ioc.value,
            ioc_type: Some(ioc.ioc_type.as_str().to_string()),
            source: Some(ioc.source),
            threat_type: Some(ioc.threat_type),
            tags: Some(ioc.tags),
            version: Some(ioc.version),
            first_seen: Some(ioc.first_seen),
            date_ingested: Some(ioc.date_ingested),
        }
    }
}

/// Response of the aggregated search
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub value: String,
    pub count: usize,
    pub overall_score: u32,
    pub all_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub sightings: Vec<Sighting>,
}

impl From<SearchDetail> for SearchResponse {
    fn from(detail: SearchDetail) -> Self {
        Self {
            value: detail.value,
            count: detail.count,
            overall_score: detail.overall_score,
            all_tags: detail.all_tags,
            first_seen: detail.first_seen,
            last_seen: detail.last_seen,
            sightings: detail.sightings.into_iter().map(Sighting::from).collect(),
        }
    }
}

/// Envelope returned to the EDR webhook
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub status: String,
    pub alert_id: String,
    pub indicators_enriched: usize,
    pub indicators_in_db: usize,
    pub notified: bool,
    pub llm_triaged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_positive: Option<bool>,
}

impl From<WebhookOutcome> for WebhookResponse {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            status: "received".to_string(),
            alert_id: outcome.alert_id,
            indicators_enriched: outcome.indicators_enriched,
            indicators_in_db: outcome.indicators_in_db,
            notified: outcome.notified,
            llm_triaged: outcome.llm_triaged,
            false_positive: outcome.false_positive,
        }
    }
}

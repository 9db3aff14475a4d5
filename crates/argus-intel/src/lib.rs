//! Argus Threat Intelligence Platform
//!
//! Aggregates indicators of compromise from heterogeneous feeds into a
//! queryable catalog, enriches inbound EDR alerts against that catalog,
//! and triages them through a guardrailed LLM pipeline.
//!
//! # Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     ARGUS THREAT INTEL CORE                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ ┌───────────┐  ┌───────────┐  ┌───────────┐                     │
//! │ │ Host List │  │ Host List │  │ Advisory  │      ... Feeds      │
//! │ └─────┬─────┘  └─────┬─────┘  └─────┬─────┘                     │
//! │       └──────────────┼──────────────┘                           │
//! │                      ▼                                          │
//! │           ┌─────────────────────┐                               │
//! │           │ Ingest Coordinator  │  bounded channel, batching    │
//! │           └──────────┬──────────┘                               │
//! │                      ▼                                          │
//! │           ┌─────────────────────┐         ┌──────────────────┐  │
//! │           │    IOC Catalog      │◄────────│ Export (CEF/STIX)│  │
//! │           └──────────┬──────────┘         └──────────────────┘  │
//! │                      ▼                                          │
//! │  EDR alert ─► Enrichment ─► Guardrails ─► LLM Triage ─► Notify  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

pub mod config;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod extractor;
pub mod guardrails;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod providers;
pub mod repository;
pub mod resilience;
pub mod triage;

pub use config::AppConfig;
pub use error::IntelError;

// =============================================================================
// Indicator of Compromise (IOC) Types
// =============================================================================

/// Indicator category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Ip,
    Domain,
    Url,
    FileHash,
    Package,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Ip => "ip",
            IocType::Domain => "domain",
            IocType::Url => "url",
            IocType::FileHash => "file_hash",
            IocType::Package => "package",
        }
    }
}

impl IocType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ip" => Some(IocType::Ip),
            "domain" => Some(IocType::Domain),
            "url" => Some(IocType::Url),
            "file_hash" => Some(IocType::FileHash),
            "package" => Some(IocType::Package),
            _ => None,
        }
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator of Compromise
///
/// `version` is non-empty only for `package` indicators; the empty string
/// means "all versions" and acts as a wildcard in versioned matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub source: String,
    pub threat_type: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: String,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub date_ingested: chrono::DateTime<chrono::Utc>,
}

impl Ioc {
    /// Catalog uniqueness key.
    pub fn key(&self) -> (String, String, String) {
        (self.value.clone(), self.source.clone(), self.version.clone())
    }
}

// =============================================================================
// Inbound EDR Alert
// =============================================================================

/// Alert received from the EDR webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdrAlert {
    #[serde(default)]
    pub alert_id: String,
    #[serde(default)]
    pub threat_name: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub indicators: Vec<AlertIndicator>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub computer_name: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub agent_version: String,
}

/// One observable attached to an alert. `type_tag` is the EDR's own label
/// (`IPV4`, `DOMAIN`, `SHA256`, ...) and is preserved verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertIndicator {
    #[serde(rename = "type", default)]
    pub type_tag: String,
    #[serde(default)]
    pub value: String,
}

// =============================================================================
// Enrichment Join Result
// =============================================================================

/// An alert indicator joined against the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedIndicator {
    pub type_tag: String,
    pub value: String,
    pub in_database: bool,
    pub sources: Vec<String>,
    pub tags: Vec<String>,
    pub threat_types: Vec<String>,
    pub first_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl EnrichedIndicator {
    /// Join catalog rows onto an alert indicator. Sources, tags and threat
    /// types are deduplicated preserving first-occurrence order; `first_seen`
    /// is the earliest across matching rows.
    pub fn from_rows(indicator: &AlertIndicator, rows: &[Ioc]) -> Self {
        let mut sources = Vec::new();
        let mut tags = Vec::new();
        let mut threat_types = Vec::new();
        let mut first_seen: Option<chrono::DateTime<chrono::Utc>> = None;

        for row in rows {
            if !sources.contains(&row.source) {
                sources.push(row.source.clone());
            }
            for tag in &row.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
            if !row.threat_type.is_empty() && !threat_types.contains(&row.threat_type) {
                threat_types.push(row.threat_type.clone());
            }
            first_seen = match first_seen {
                Some(seen) if seen <= row.first_seen => Some(seen),
                _ => Some(row.first_seen),
            };
        }

        Self {
            type_tag: indicator.type_tag.clone(),
            value: indicator.value.clone(),
            in_database: !rows.is_empty(),
            sources,
            tags,
            threat_types,
            first_seen,
        }
    }
}

/// Everything the triager needs to reason about one alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatContext {
    pub alert: EdrAlert,
    pub indicators: Vec<EnrichedIndicator>,
}

impl ThreatContext {
    pub fn any_in_database(&self) -> bool {
        self.indicators.iter().any(|i| i.in_database)
    }
}

// =============================================================================
// Triage Result
// =============================================================================

/// Alert severity, ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Canonical priority for a severity: critical=1 .. info=5.
    pub fn canonical_priority(&self) -> i32 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
            Severity::Info => 5,
        }
    }

    /// Lenient parse; trims and lowercases, `None` for anything outside the enum.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict produced by the triage pipeline and handed to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub severity: Severity,
    pub priority: i32,
    pub summary: String,
    pub analysis: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    pub false_positive: bool,
    pub confidence: i32,
}

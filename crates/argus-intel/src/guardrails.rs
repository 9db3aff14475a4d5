//! Deterministic guardrails around LLM triage
//!
//! The pre-filter can settle an alert without spending an LLM call; the
//! post-filter validates and adjusts whatever the LLM returns. Both are
//! pure functions over the alert context, with every activated rule
//! reported back as a metric label.

use crate::{EdrAlert, EnrichedIndicator, Severity, TriageResult};
use serde::Deserialize;

/// Hosts that are legitimate service infrastructure: cloud providers, OS
/// update endpoints, major CDNs. Matching is case-insensitive substring.
pub const BENIGN_INFRASTRUCTURE: &[&str] = &[
    "amazonaws.com",
    "azure.com",
    "azureedge.net",
    "microsoft.com",
    "windowsupdate.com",
    "windows.com",
    "office.com",
    "office365.com",
    "google.com",
    "googleapis.com",
    "gstatic.com",
    "cloudflare.com",
    "akamai.net",
    "akamaiedge.net",
    "fastly.net",
    "apple.com",
    "icloud.com",
    "ubuntu.com",
    "debian.org",
    "digicert.com",
];

/// Threat-type fragments that mark an indicator as confirmed hostile.
pub const HIGH_RISK_THREAT_TYPES: &[&str] = &[
    "c2_server",
    "c2",
    "command_and_control",
    "malware_download",
    "ransomware",
    "botnet",
    "phishing",
    "cryptominer",
    "backdoor",
    "trojan",
    "rat",
    "webshell",
];

/// Tunable guardrail thresholds.
#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    /// A verdict may only stay a false positive at or above this confidence.
    pub min_fp_confidence: i32,
    /// Whether `critical` requires at least one catalog hit.
    pub require_intel_for_critical: bool,
    /// Severity ceiling applied when no indicator is in the catalog.
    pub max_severity_without_intel: Severity,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_fp_confidence: 85,
            require_intel_for_critical: true,
            max_severity_without_intel: Severity::High,
        }
    }
}

/// Verdict as the LLM returned it, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmVerdict {
    #[serde(default)]
    pub severity: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub confidence: i32,
}

fn default_priority() -> i32 {
    3
}

// =============================================================================
// Pre-filter
// =============================================================================

/// Decide an alert before the LLM sees it. `Some` means skip the call; the
/// second element lists activated rule labels for metrics.
pub fn pre_filter(
    alert: &EdrAlert,
    enriched: &[EnrichedIndicator],
) -> (Option<TriageResult>, Vec<&'static str>) {
    // Rule 1: every indicator resolves to well-known legitimate infrastructure.
    if !enriched.is_empty() && enriched.iter().all(|i| matches_benign(&i.value)) {
        let result = TriageResult {
            severity: Severity::Info,
            priority: 5,
            summary: "Legitimate infrastructure traffic".to_string(),
            analysis: format!(
                "All {} indicator(s) on alert {} resolve to well-known legitimate service \
                 infrastructure (cloud providers, OS update endpoints, CDNs).",
                enriched.len(),
                alert.alert_id
            ),
            recommended_actions: vec![
                "No containment action required".to_string(),
                "Confirm the detection rule that flagged this traffic is not overly broad".to_string(),
            ],
            false_positive: true,
            confidence: 95,
        };
        return (Some(result), vec!["skip"]);
    }

    // Rule 2: a catalog hit with a high-risk threat type is already a verdict.
    if let Some(hit) = enriched
        .iter()
        .find(|i| i.in_database && i.threat_types.iter().any(|t| matches_high_risk(t)))
    {
        let result = TriageResult {
            severity: Severity::High,
            priority: 2,
            summary: "Confirmed malicious indicator from threat intelligence".to_string(),
            analysis: format!(
                "Indicator {} is present in the threat intelligence catalog with high-risk \
                 threat type(s) [{}] reported by [{}].",
                hit.value,
                hit.threat_types.join(", "),
                hit.sources.join(", ")
            ),
            recommended_actions: vec![
                "Isolate the affected endpoint".to_string(),
                "Block the matched indicators at the perimeter".to_string(),
                "Open an incident for follow-up investigation".to_string(),
            ],
            false_positive: false,
            confidence: 90,
        };
        return (Some(result), vec!["skip"]);
    }

    (None, Vec::new())
}

fn matches_benign(value: &str) -> bool {
    let value = value.to_lowercase();
    BENIGN_INFRASTRUCTURE.iter().any(|host| value.contains(host))
}

fn matches_high_risk(threat_type: &str) -> bool {
    let threat_type = threat_type.to_lowercase();
    HIGH_RISK_THREAT_TYPES.iter().any(|t| threat_type.contains(t))
}

// =============================================================================
// Post-filter
// =============================================================================

/// Validate and adjust the LLM's verdict against the catalog facts.
/// Returns the final result plus activated rule labels for metrics.
pub fn post_filter(
    raw: LlmVerdict,
    enriched: &[EnrichedIndicator],
    config: &GuardrailConfig,
) -> (TriageResult, Vec<&'static str>) {
    let mut actions = Vec::new();
    let any_in_db = enriched.iter().any(|i| i.in_database);

    // 1. Normalize into the enum and legal ranges.
    let parsed = Severity::parse(&raw.severity);
    let mut severity = parsed.unwrap_or(Severity::Medium);
    let mut confidence = raw.confidence.clamp(0, 100);
    let mut priority = raw.priority.clamp(1, 5);
    let mut false_positive = raw.false_positive;
    let mut analysis = raw.analysis;
    let mut recommended = raw.recommended_actions;
    if parsed.is_none() || confidence != raw.confidence || priority != raw.priority {
        actions.push("override");
    }

    // 2. A false positive cannot coexist with a catalog hit.
    if false_positive && any_in_db {
        false_positive = false;
        confidence = (confidence - 20).max(50);
        if matches!(severity, Severity::Info | Severity::Low) {
            severity = Severity::Medium;
            priority = 3;
        }
        actions.push("override");
    }

    // 3. High-risk intel forces at least `high`.
    let high_risk_hit = enriched
        .iter()
        .any(|i| i.threat_types.iter().any(|t| matches_high_risk(t)));
    if high_risk_hit && matches!(severity, Severity::Info | Severity::Low) {
        severity = Severity::High;
        priority = 2;
        false_positive = false;
        confidence = (confidence + 10).min(85);
        actions.push("boost");
    }

    // 4. Without any catalog hit, severity is capped.
    if !any_in_db {
        if severity == Severity::Critical && config.require_intel_for_critical {
            severity = config.max_severity_without_intel;
            priority = severity.canonical_priority();
            confidence = confidence.min(75);
            actions.push("downgrade");
        } else if severity == Severity::High && confidence < 80 {
            severity = Severity::Medium;
            priority = 3;
            confidence = confidence.min(70);
            actions.push("downgrade");
        }
    }

    // 5. Independent corroboration raises confidence.
    let mut distinct_sources: Vec<&str> = Vec::new();
    for indicator in enriched {
        for source in &indicator.sources {
            if !distinct_sources.contains(&source.as_str()) {
                distinct_sources.push(source);
            }
        }
    }
    if distinct_sources.len() >= 3 {
        confidence = (confidence + 15).min(98);
        actions.push("boost");
    }

    // 6. Low-confidence false positives go back to a human.
    if false_positive && confidence < config.min_fp_confidence {
        false_positive = false;
        severity = Severity::Low;
        priority = 4;
        analysis.push_str(
            " Confidence is below the false-positive threshold; analyst review required.",
        );
        actions.push("override");
    }

    // 7. Priority must track severity within one step.
    if (priority - severity.canonical_priority()).abs() > 1 {
        priority = severity.canonical_priority();
        actions.push("override");
    }

    // 8. Non-false-positives always carry recommendations.
    if recommended.is_empty() && !false_positive {
        recommended = default_recommendations(severity);
        actions.push("override");
    }

    let result = TriageResult {
        severity,
        priority,
        summary: raw.summary,
        analysis,
        recommended_actions: recommended,
        false_positive,
        confidence,
    };
    (result, actions)
}

/// Severity-keyed default action lists.
pub fn default_recommendations(severity: Severity) -> Vec<String> {
    let actions: &[&str] = match severity {
        Severity::Critical => &[
            "Isolate the affected endpoint immediately",
            "Block all associated indicators at the perimeter",
            "Capture a forensic image before remediation",
            "Escalate to the incident response lead",
        ],
        Severity::High => &[
            "Isolate the affected endpoint",
            "Block associated indicators at the perimeter",
            "Review endpoint activity around the detection window",
        ],
        Severity::Medium => &[
            "Block associated indicators",
            "Monitor the endpoint for further activity",
        ],
        Severity::Low => &["Review during the next triage cycle"],
        Severity::Info => &["Retain for context; no action required"],
    };
    actions.iter().map(|a| a.to_string()).collect()
}

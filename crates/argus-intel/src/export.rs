//! Catalog export
//!
//! Serializes a recent catalog window for downstream SIEM pulls, in two
//! wire formats: a line-oriented CEF feed and a STIX 2.1 bundle.

use crate::error::IntelError;
use crate::repository::IocRepository;
use crate::{Ioc, IocType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CEF_VENDOR: &str = "Argus";
const CEF_PRODUCT: &str = "ThreatIntel";
const CEF_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sources whose reports weigh more in the confidence score.
pub const HIGH_TRUST_SOURCES: &[&str] = &["urlhaus", "feodo-tracker", "sslbl", "osv"];

/// Export wire formats accepted on the feed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Cef,
    Stix,
    /// Accepted on the wire but not implemented; surfaces as 501.
    Json,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cef" => Some(ExportFormat::Cef),
            "stix" => Some(ExportFormat::Stix),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// Windows the catalog and renders it per format.
pub struct Exporter {
    repository: Arc<dyn IocRepository>,
}

impl Exporter {
    pub fn new(repository: Arc<dyn IocRepository>) -> Self {
        Self { repository }
    }

    /// Render the window since `since` as one CEF line per indicator.
    pub async fn export_cef(&self, since: DateTime<Utc>) -> Result<String, IntelError> {
        let rows = self.repository.find_since(since, 0).await?;
        let mut out = String::new();
        for ioc in &rows {
            out.push_str(&cef_line(ioc));
            out.push('\n');
        }
        Ok(out)
    }

    /// Render the window since `since` as a STIX 2.1 bundle.
    pub async fn export_stix(&self, since: DateTime<Utc>) -> Result<StixBundle, IntelError> {
        let rows = self.repository.find_since(since, 0).await?;
        let now = Utc::now();
        Ok(StixBundle {
            bundle_type: "bundle".to_string(),
            id: format!("bundle--{}", uuid::Uuid::new_v4()),
            spec_version: "2.1".to_string(),
            objects: rows.iter().map(|ioc| stix_indicator(ioc, now)).collect(),
        })
    }
}

// =============================================================================
// Confidence scoring
// =============================================================================

/// Deterministic per-row confidence score.
pub fn confidence_score(ioc: &Ioc) -> u32 {
    let mut score = 70u32;
    if HIGH_TRUST_SOURCES.contains(&ioc.source.as_str()) {
        score += 10;
    }
    if ioc.threat_type == "malware_download" || ioc.threat_type == "c2_server" {
        score += 5;
    }
    if ioc.tags.len() > 3 {
        score += 5;
    }
    score.min(100)
}

/// CEF severity (0-10) from a confidence score.
fn cef_severity(score: u32) -> u32 {
    match score {
        s if s >= 90 => 10,
        s if s >= 80 => 8,
        s if s >= 70 => 6,
        s if s >= 60 => 4,
        _ => 2,
    }
}

fn human_name(ioc_type: IocType) -> &'static str {
    match ioc_type {
        IocType::Ip => "Malicious IP Address",
        IocType::Domain => "Malicious Domain",
        IocType::Url => "Malicious URL",
        IocType::FileHash => "Malicious File Hash",
        IocType::Package => "Malicious Package",
    }
}

// =============================================================================
// CEF
// =============================================================================

/// Escape the CEF metacharacters inside a field value.
pub fn cef_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`cef_escape`].
pub fn cef_unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('=') => out.push('='),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn cef_line(ioc: &Ioc) -> String {
    let score = confidence_score(ioc);
    let extensions = [
        format!("src={}", cef_escape(&ioc.value)),
        "cn1Label=ConfidenceScore".to_string(),
        format!("cn1={score}"),
        "cs1Label=ThreatType".to_string(),
        format!("cs1={}", cef_escape(&ioc.threat_type)),
        "cs2Label=Sources".to_string(),
        format!("cs2={}", cef_escape(&ioc.source)),
        "cs3Label=Tags".to_string(),
        format!("cs3={}", cef_escape(&ioc.tags.join(","))),
        format!("rt={}", ioc.first_seen.timestamp_millis()),
    ]
    .join(" ");

    format!(
        "CEF:0|{}|{}|{}|{}|{}|{}|{}",
        cef_escape(CEF_VENDOR),
        cef_escape(CEF_PRODUCT),
        cef_escape(CEF_VERSION),
        cef_escape(ioc.ioc_type.as_str()),
        cef_escape(human_name(ioc.ioc_type)),
        cef_severity(score),
        extensions
    )
}

// =============================================================================
// STIX 2.1
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StixBundle {
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub id: String,
    pub spec_version: String,
    pub objects: Vec<StixIndicator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StixIndicator {
    #[serde(rename = "type")]
    pub object_type: String,
    pub spec_version: String,
    pub id: String,
    pub created: String,
    pub modified: String,
    pub name: String,
    pub pattern: String,
    pub pattern_type: String,
    pub valid_from: String,
    pub indicator_types: Vec<String>,
    pub confidence: u32,
    pub labels: Vec<String>,
    pub external_references: Vec<ExternalReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_name: String,
    pub url: String,
}

fn stix_indicator(ioc: &Ioc, now: DateTime<Utc>) -> StixIndicator {
    StixIndicator {
        object_type: "indicator".to_string(),
        spec_version: "2.1".to_string(),
        id: format!("indicator--{}", uuid::Uuid::new_v4()),
        created: now.to_rfc3339(),
        modified: now.to_rfc3339(),
        name: format!("{}: {}", human_name(ioc.ioc_type), ioc.value),
        pattern: stix_pattern(ioc),
        pattern_type: "stix".to_string(),
        valid_from: ioc.first_seen.to_rfc3339(),
        indicator_types: indicator_types(&ioc.threat_type),
        confidence: confidence_score(ioc),
        labels: ioc.tags.clone(),
        external_references: vec![ExternalReference {
            source_name: ioc.source.clone(),
            url: source_reference_url(&ioc.source).to_string(),
        }],
    }
}

/// STIX pattern for one indicator, keyed by type.
pub fn stix_pattern(ioc: &Ioc) -> String {
    let value = stix_quote(&ioc.value);
    match ioc.ioc_type {
        IocType::Ip => format!("[ipv4-addr:value = '{value}']"),
        IocType::Domain => format!("[domain-name:value = '{value}']"),
        IocType::Url => format!("[url:value = '{value}']"),
        IocType::FileHash => {
            let algo = match ioc.value.len() {
                32 => "MD5",
                40 => "SHA-1",
                _ => "SHA-256",
            };
            format!("[file:hashes.'{algo}' = '{value}']")
        }
        IocType::Package => format!("[software:name = '{value}']"),
    }
}

fn stix_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn indicator_types(threat_type: &str) -> Vec<String> {
    let mapped: &[&str] = match threat_type {
        "c2_server" => &["malicious-activity", "command-and-control"],
        "malware_download" => &["malicious-activity", "malware"],
        "supply_chain_malware" => &["malicious-activity", "supply-chain-compromise"],
        "phishing" => &["phishing"],
        "botnet" => &["botnet"],
        "scanner" => &["anomalous-activity"],
        _ => &["malicious-activity"],
    };
    mapped.iter().map(|s| s.to_string()).collect()
}

fn source_reference_url(source: &str) -> &'static str {
    match source {
        "urlhaus" => "https://urlhaus.abuse.ch/",
        "feodo-tracker" => "https://feodotracker.abuse.ch/",
        "sslbl" => "https://sslbl.abuse.ch/",
        "osv" => "https://osv.dev/",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryIocRepository;

    fn ioc(value: &str, ioc_type: IocType, source: &str, threat_type: &str, tags: &[&str]) -> Ioc {
        Ioc {
            value: value.to_string(),
            ioc_type,
            source: source.to_string(),
            threat_type: threat_type.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            version: String::new(),
            first_seen: Utc::now() - chrono::Duration::hours(1),
            date_ingested: Utc::now(),
        }
    }

    /// Split a CEF line on unescaped pipes.
    fn split_unescaped(line: &str) -> Vec<String> {
        let mut fields = vec![String::new()];
        let mut escaped = false;
        for c in line.chars() {
            if escaped {
                fields.last_mut().unwrap().push('\\');
                fields.last_mut().unwrap().push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '|' {
                fields.push(String::new());
            } else {
                fields.last_mut().unwrap().push(c);
            }
        }
        fields
    }

    #[test]
    fn test_escape_round_trip() {
        let samples = [
            "plain.example.com",
            "pipes|and=equals",
            "back\\slash",
            "line\nbreak\rreturn",
            "mixed \\| \\= |=\n\\",
            "trailing\\",
            "",
        ];
        for sample in samples {
            assert_eq!(cef_unescape(&cef_escape(sample)), sample, "round trip for {sample:?}");
        }
    }

    #[test]
    fn test_escaped_values_survive_field_split() {
        let row = ioc("evil|host=x.example.com", IocType::Domain, "urlhaus", "c2_server", &[]);
        let line = cef_line(&row);
        let fields = split_unescaped(&line);
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], "CEF:0");
        assert_eq!(fields[1], "Argus");
        assert_eq!(fields[4], "domain");
        // The value keeps its metacharacters escaped inside the extension field.
        assert!(fields[7].contains("src=evil\\|host\\=x.example.com"));
    }

    #[test]
    fn test_confidence_score() {
        let base = ioc("a.example.com", IocType::Domain, "random-feed", "scanner", &[]);
        assert_eq!(confidence_score(&base), 70);

        let trusted = ioc("a.example.com", IocType::Domain, "urlhaus", "c2_server", &[]);
        assert_eq!(confidence_score(&trusted), 85);

        let tagged = ioc(
            "a.example.com",
            IocType::Domain,
            "urlhaus",
            "malware_download",
            &["a", "b", "c", "d"],
        );
        assert_eq!(confidence_score(&tagged), 90);
    }

    #[test]
    fn test_cef_severity_mapping() {
        assert_eq!(cef_severity(95), 10);
        assert_eq!(cef_severity(85), 8);
        assert_eq!(cef_severity(75), 6);
        assert_eq!(cef_severity(65), 4);
        assert_eq!(cef_severity(50), 2);
    }

    #[test]
    fn test_stix_patterns_by_type() {
        let ip = ioc("203.0.113.9", IocType::Ip, "s", "", &[]);
        assert_eq!(stix_pattern(&ip), "[ipv4-addr:value = '203.0.113.9']");

        let domain = ioc("evil.example.com", IocType::Domain, "s", "", &[]);
        assert_eq!(stix_pattern(&domain), "[domain-name:value = 'evil.example.com']");

        let url = ioc("http://evil.example.com/x", IocType::Url, "s", "", &[]);
        assert_eq!(stix_pattern(&url), "[url:value = 'http://evil.example.com/x']");

        let md5 = ioc(&"a".repeat(32), IocType::FileHash, "s", "", &[]);
        assert!(stix_pattern(&md5).starts_with("[file:hashes.'MD5'"));
        let sha1 = ioc(&"a".repeat(40), IocType::FileHash, "s", "", &[]);
        assert!(stix_pattern(&sha1).starts_with("[file:hashes.'SHA-1'"));
        let sha256 = ioc(&"a".repeat(64), IocType::FileHash, "s", "", &[]);
        assert!(stix_pattern(&sha256).starts_with("[file:hashes.'SHA-256'"));

        let package = ioc("lodash", IocType::Package, "s", "", &[]);
        assert_eq!(stix_pattern(&package), "[software:name = 'lodash']");
    }

    #[test]
    fn test_indicator_types_fallback() {
        assert_eq!(
            indicator_types("c2_server"),
            vec!["malicious-activity", "command-and-control"]
        );
        assert_eq!(indicator_types("never-seen"), vec!["malicious-activity"]);
    }

    #[tokio::test]
    async fn test_export_cef_windows_the_catalog() {
        let repository = Arc::new(MemoryIocRepository::new());
        let mut old = ioc("old.example.com", IocType::Domain, "urlhaus", "c2_server", &[]);
        old.date_ingested = Utc::now() - chrono::Duration::days(3);
        repository
            .save_batch(&[old, ioc("new.example.com", IocType::Domain, "urlhaus", "c2_server", &[])])
            .await
            .unwrap();

        let exporter = Exporter::new(repository);
        let out = exporter
            .export_cef(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("CEF:0|Argus|ThreatIntel|"));
        assert!(lines[0].contains("src=new.example.com"));
        assert!(lines[0].contains("cn1Label=ConfidenceScore cn1=85"));
    }

    #[tokio::test]
    async fn test_export_stix_bundle_shape() {
        let repository = Arc::new(MemoryIocRepository::new());
        repository
            .save_batch(&[ioc("203.0.113.9", IocType::Ip, "feodo-tracker", "c2_server", &["c2"])])
            .await
            .unwrap();

        let exporter = Exporter::new(repository);
        let bundle = exporter
            .export_stix(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(bundle.bundle_type, "bundle");
        assert_eq!(bundle.spec_version, "2.1");
        assert!(bundle.id.starts_with("bundle--"));
        assert_eq!(bundle.objects.len(), 1);

        let indicator = &bundle.objects[0];
        assert!(indicator.id.starts_with("indicator--"));
        assert_eq!(indicator.pattern_type, "stix");
        assert_eq!(indicator.pattern, "[ipv4-addr:value = '203.0.113.9']");
        assert_eq!(indicator.external_references[0].url, "https://feodotracker.abuse.ch/");
        assert_eq!(indicator.labels, vec!["c2"]);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse("cef"), Some(ExportFormat::Cef));
        assert_eq!(ExportFormat::parse("STIX"), Some(ExportFormat::Stix));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("xml"), None);
    }
}

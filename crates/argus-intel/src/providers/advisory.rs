//! Package advisory archive feeds
//!
//! Fetches a gzip-compressed advisory bundle and emits one `package`
//! indicator per (package, affected version) pair. An advisory without an
//! affected-version list means the whole package is bad; that is recorded
//! as a single indicator with the empty wildcard version.

use crate::error::ProviderError;
use crate::providers::FeedProvider;
use crate::{Ioc, IocType};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use tracing::info;

/// Provider for compressed package-advisory bundles.
pub struct AdvisoryArchiveProvider {
    name: String,
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Advisory {
    id: String,
    #[serde(default)]
    affected: Vec<Affected>,
    #[serde(default)]
    modified: String,
}

#[derive(Debug, Deserialize)]
struct Affected {
    package: Package,
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Package {
    name: String,
}

impl AdvisoryArchiveProvider {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Ioc>, ProviderError> {
        let body = decompress(raw)?;
        let advisories = parse_advisories(&body)?;

        let now = chrono::Utc::now();
        let mut iocs = Vec::new();
        for advisory in advisories {
            let first_seen = chrono::DateTime::parse_from_rfc3339(&advisory.modified)
                .map(|d| d.with_timezone(&chrono::Utc))
                .unwrap_or(now);

            let wildcard = [String::new()];
            for affected in &advisory.affected {
                let versions: &[String] = if affected.versions.is_empty() {
                    &wildcard
                } else {
                    &affected.versions
                };
                for version in versions {
                    iocs.push(Ioc {
                        value: affected.package.name.clone(),
                        ioc_type: IocType::Package,
                        source: self.name.clone(),
                        threat_type: "supply_chain_malware".to_string(),
                        tags: vec![advisory.id.clone()],
                        version: version.clone(),
                        first_seen,
                        date_ingested: now,
                    });
                }
            }
        }
        Ok(iocs)
    }
}

/// Gunzip the bundle; bodies without the gzip magic pass through untouched.
fn decompress(raw: &[u8]) -> Result<String, ProviderError> {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(raw);
        let mut body = String::new();
        decoder
            .read_to_string(&mut body)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body)
    } else {
        String::from_utf8(raw.to_vec()).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// The bundle is either a bare JSON array of advisories or an object
/// wrapping one under `advisories`.
fn parse_advisories(body: &str) -> Result<Vec<Advisory>, ProviderError> {
    if let Ok(list) = serde_json::from_str::<Vec<Advisory>>(body) {
        return Ok(list);
    }
    #[derive(Deserialize)]
    struct Wrapper {
        advisories: Vec<Advisory>,
    }
    serde_json::from_str::<Wrapper>(body)
        .map(|w| w.advisories)
        .map_err(|e| ProviderError::Parse(e.to_string()))
}

#[async_trait]
impl FeedProvider for AdvisoryArchiveProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Ioc>, ProviderError> {
        info!(feed = %self.name, url = %self.url, "fetching advisory archive");

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(response.status().as_u16()));
        }
        let raw = response.bytes().await?;

        let iocs = self.parse(&raw)?;
        info!(feed = %self.name, count = iocs.len(), "advisory archive parsed");
        Ok(iocs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const BUNDLE: &str = r#"[
        {
            "id": "MAL-2024-0001",
            "modified": "2024-06-01T00:00:00Z",
            "affected": [
                {"package": {"name": "lodash"}, "versions": ["4.17.0", "4.17.1"]}
            ]
        },
        {
            "id": "MAL-2024-0002",
            "modified": "not a date",
            "affected": [
                {"package": {"name": "left-pad"}, "versions": []}
            ]
        }
    ]"#;

    fn provider() -> AdvisoryArchiveProvider {
        AdvisoryArchiveProvider::new("osv-test", "http://feeds.invalid/all.json.gz")
    }

    #[test]
    fn test_parse_version_pairs() {
        let iocs = provider().parse(BUNDLE.as_bytes()).unwrap();
        assert_eq!(iocs.len(), 3);

        assert_eq!(iocs[0].value, "lodash");
        assert_eq!(iocs[0].version, "4.17.0");
        assert_eq!(iocs[0].ioc_type, IocType::Package);
        assert_eq!(iocs[0].tags, vec!["MAL-2024-0001"]);
        assert_eq!(
            iocs[0].first_seen,
            chrono::DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap()
        );
        assert_eq!(iocs[1].version, "4.17.1");
    }

    #[test]
    fn test_empty_versions_means_wildcard() {
        let iocs = provider().parse(BUNDLE.as_bytes()).unwrap();
        assert_eq!(iocs[2].value, "left-pad");
        assert_eq!(iocs[2].version, "");
    }

    #[test]
    fn test_parse_gzipped_bundle() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(BUNDLE.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let iocs = provider().parse(&compressed).unwrap();
        assert_eq!(iocs.len(), 3);
    }

    #[test]
    fn test_garbage_bundle_is_a_parse_error() {
        let err = provider().parse(b"not json").unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }
}

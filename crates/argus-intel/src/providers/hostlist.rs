//! Newline-separated host/IP list feeds
//!
//! The workhorse format of public blocklists: one indicator per line,
//! `#`-style comments, the occasional full URL.

use crate::error::ProviderError;
use crate::extractor::{extract_components, is_ip_literal, normalize};
use crate::providers::FeedProvider;
use crate::{Ioc, IocType};
use async_trait::async_trait;
use tracing::info;

/// Provider for plain-text host list feeds.
pub struct HostListProvider {
    name: String,
    url: String,
    threat_type: String,
    tags: Vec<String>,
    client: reqwest::Client,
}

impl HostListProvider {
    pub fn new(name: &str, url: &str, threat_type: &str, tags: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            threat_type: threat_type.to_string(),
            tags,
            client: reqwest::Client::new(),
        }
    }

    /// Parse the feed body into indicators. Lines are trimmed, `#` and `//`
    /// comments stripped, and lines without a `.` dropped; URL-style lines
    /// are decomposed into their sub-indicators.
    fn parse(&self, body: &str) -> Vec<Ioc> {
        let now = chrono::Utc::now();
        let mut iocs = Vec::new();

        for raw in body.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            // Inline `#` comments are stripped; `//` only marks a comment at
            // line start, since it also appears inside URL schemes.
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || !line.contains('.') {
                continue;
            }

            let ioc_type = classify(line);
            let ioc = Ioc {
                value: normalize(line, ioc_type),
                ioc_type,
                source: self.name.clone(),
                threat_type: self.threat_type.clone(),
                tags: self.tags.clone(),
                version: String::new(),
                first_seen: now,
                date_ingested: now,
            };
            iocs.extend(extract_components(&ioc));
        }

        iocs
    }
}

/// Classify a feed line: IP literal, URL, or bare domain.
fn classify(line: &str) -> IocType {
    if is_ip_literal(line) {
        IocType::Ip
    } else if line.starts_with("http://") || line.starts_with("https://") {
        IocType::Url
    } else {
        IocType::Domain
    }
}

#[async_trait]
impl FeedProvider for HostListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Ioc>, ProviderError> {
        info!(feed = %self.name, url = %self.url, "fetching host list feed");

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(response.status().as_u16()));
        }
        let body = response.text().await?;

        let iocs = self.parse(&body);
        info!(feed = %self.name, count = iocs.len(), "host list feed parsed");
        Ok(iocs)
    }
}

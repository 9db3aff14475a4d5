//! IOC decomposition
//!
//! Complex indicator values carry sub-indicators: a URL names a host, a
//! host may be an IP literal. EDR alerts commonly deliver the bare host
//! when a feed only delivered the full URL, so every ingested indicator is
//! decomposed before persistence or the join misses.

use crate::{Ioc, IocType};
use std::net::IpAddr;

/// Tag prepended to indicators lifted out of a URL host.
pub const TAG_EXTRACTED_FROM_URL: &str = "extracted-from-url";
/// Tag prepended to IP literals found inside a non-URL value.
pub const TAG_EXTRACTED_FROM_VALUE: &str = "extracted-from-value";

/// Decompose an indicator into itself plus any sub-indicators.
///
/// The input is always first in the returned sequence. Extracted indicators
/// inherit `source`, `threat_type`, `first_seen` and `date_ingested`; their
/// `version` is empty and their tags gain an extraction marker.
pub fn extract_components(source_ioc: &Ioc) -> Vec<Ioc> {
    let mut out = vec![source_ioc.clone()];

    if let Some(host) = parse_http_host(&source_ioc.value) {
        let ioc_type = if is_ip_literal(&host) { IocType::Ip } else { IocType::Domain };
        out.push(derive_child(source_ioc, host, ioc_type, TAG_EXTRACTED_FROM_URL));
        return out;
    }

    if !source_ioc.value.starts_with("http") {
        if let Some(ip) = embedded_ip(&source_ioc.value) {
            out.push(derive_child(source_ioc, ip, IocType::Ip, TAG_EXTRACTED_FROM_VALUE));
        }
    }

    out
}

/// Normalize an indicator value for catalog matching.
pub fn normalize(value: &str, ioc_type: IocType) -> String {
    match ioc_type {
        IocType::Url => {
            let lower = value.to_lowercase();
            lower.strip_suffix('/').unwrap_or(&lower).to_string()
        }
        IocType::Domain => value.to_lowercase(),
        IocType::Ip => value.trim().to_string(),
        _ => value.to_string(),
    }
}

/// Whether a string is a textual IPv4/IPv6 literal.
pub fn is_ip_literal(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

fn derive_child(parent: &Ioc, value: String, ioc_type: IocType, marker: &str) -> Ioc {
    let mut tags = Vec::with_capacity(parent.tags.len() + 1);
    tags.push(marker.to_string());
    tags.extend(parent.tags.iter().cloned());

    Ioc {
        value,
        ioc_type,
        source: parent.source.clone(),
        threat_type: parent.threat_type.clone(),
        tags,
        version: String::new(),
        first_seen: parent.first_seen,
        date_ingested: parent.date_ingested,
    }
}

/// Host of an absolute http/https URL, brackets stripped for IPv6.
fn parse_http_host(value: &str) -> Option<String> {
    let parsed = url::Url::parse(value).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    match parsed.host()? {
        url::Host::Ipv4(addr) => Some(addr.to_string()),
        url::Host::Ipv6(addr) => Some(addr.to_string()),
        url::Host::Domain(domain) => Some(domain.to_string()),
    }
}

/// The single IP literal embedded in a non-URL value, if there is exactly
/// one distinct from the value itself.
fn embedded_ip(value: &str) -> Option<String> {
    let mut found: Option<String> = None;
    for token in value.split(|c| c == ':' || c == '/' || c == '?') {
        if token == value || token.is_empty() || !is_ip_literal(token) {
            continue;
        }
        match &found {
            Some(existing) if existing != token => return None,
            _ => found = Some(token.to_string()),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ioc(value: &str, ioc_type: IocType) -> Ioc {
        Ioc {
            value: value.to_string(),
            ioc_type,
            source: "urlhaus".to_string(),
            threat_type: "malware_download".to_string(),
            tags: vec!["payload".to_string()],
            version: String::new(),
            first_seen: chrono::Utc::now(),
            date_ingested: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_url_with_domain_host() {
        let parent = ioc("http://evil.example.com/dropper.sh", IocType::Url);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].value, parent.value);
        assert_eq!(parts[1].ioc_type, IocType::Domain);
        assert_eq!(parts[1].value, "evil.example.com");
        assert_eq!(parts[1].tags, vec!["extracted-from-url", "payload"]);
        assert_eq!(parts[1].source, parent.source);
        assert_eq!(parts[1].first_seen, parent.first_seen);
        assert!(parts[1].version.is_empty());
    }

    #[test]
    fn test_url_with_ipv4_host() {
        let parent = ioc("http://198.51.100.7/a.sh", IocType::Url);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].ioc_type, IocType::Ip);
        assert_eq!(parts[1].value, "198.51.100.7");
        assert!(parts[1].tags.contains(&"extracted-from-url".to_string()));
    }

    #[test]
    fn test_url_with_ipv6_host() {
        let parent = ioc("https://[2001:db8::1]:8443/x", IocType::Url);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].ioc_type, IocType::Ip);
        assert_eq!(parts[1].value, "2001:db8::1");
    }

    #[test]
    fn test_non_url_with_embedded_ip() {
        let parent = ioc("evil.example.com/203.0.113.9", IocType::Domain);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].ioc_type, IocType::Ip);
        assert_eq!(parts[1].value, "203.0.113.9");
        assert_eq!(parts[1].tags[0], "extracted-from-value");
    }

    #[test]
    fn test_bare_ip_not_reextracted() {
        let parent = ioc("203.0.113.9", IocType::Ip);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_two_distinct_embedded_ips_extract_nothing() {
        let parent = ioc("203.0.113.9/198.51.100.7", IocType::Domain);
        let parts = extract_components(&parent);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_non_http_scheme_ignored() {
        let parent = ioc("ftp://198.51.100.7/a.bin", IocType::Url);
        let parts = extract_components(&parent);
        // ftp is not decomposed as a URL, and the value starts with neither
        // "http" nor contains a lone IP token distinct from itself.
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].value, "198.51.100.7");
        assert_eq!(parts[1].tags[0], "extracted-from-value");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("HTTP://Evil.COM/Path/", IocType::Url), "http://evil.com/path");
        assert_eq!(normalize("Evil.COM", IocType::Domain), "evil.com");
        assert_eq!(normalize("  203.0.113.9 ", IocType::Ip), "203.0.113.9");
        assert_eq!(normalize("LoDash", IocType::Package), "LoDash");
    }
}

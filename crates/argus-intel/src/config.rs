//! Environment configuration
//!
//! Everything is settable through environment variables and parsed once at
//! startup. Unparseable values fall back to the default with a warning
//! rather than aborting boot.

use crate::guardrails::GuardrailConfig;
use crate::ingest::IngestConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::triage::LlmConfig;
use crate::Severity;
use std::time::Duration;
use tracing::warn;

/// One upstream feed endpoint.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub urlhaus_url: String,
    pub blocklist_url: String,
    pub osv_url: String,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Catalog connection string; `None` selects the in-memory catalog.
    pub database_url: Option<String>,
    pub api_port: u16,
    /// Bearer token for all routes except health; `None` disables auth.
    pub api_auth_token: Option<String>,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub guardrails: GuardrailConfig,
    pub notifier_webhook_url: Option<String>,
    pub ingest: IngestConfig,
    pub ingest_interval: Duration,
    pub feeds: FeedSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_opt("DATABASE_URL"),
            api_port: env_parse("REST_API_PORT", 8080),
            api_auth_token: env_opt("REST_API_AUTH_TOKEN"),
            llm: LlmConfig {
                enabled: env_bool("LLM_TRIAGE_ENABLED", false),
                api_url: env_string(
                    "LLM_API_URL",
                    "https://api.openai.com/v1/chat/completions",
                ),
                api_key: env_string("LLM_API_KEY", ""),
                model: env_string("LLM_MODEL", "gpt-4o-mini"),
                ..Default::default()
            },
            retry: RetryConfig {
                enabled: env_bool("LLM_RETRY_ENABLED", true),
                max_retries: env_parse("LLM_RETRY_MAX_ATTEMPTS", 3),
                initial_interval: Duration::from_millis(env_parse(
                    "LLM_RETRY_INITIAL_INTERVAL_MS",
                    500,
                )),
                max_interval: Duration::from_millis(env_parse("LLM_RETRY_MAX_INTERVAL_MS", 5_000)),
            },
            breaker: CircuitBreakerConfig {
                enabled: env_bool("LLM_CIRCUIT_BREAKER_ENABLED", true),
                max_failures: env_parse("LLM_CIRCUIT_BREAKER_MAX_FAILURES", 5),
                open_timeout: Duration::from_secs(env_parse(
                    "LLM_CIRCUIT_BREAKER_TIMEOUT_SECONDS",
                    30,
                )),
            },
            guardrails: GuardrailConfig {
                min_fp_confidence: env_parse("LLM_GUARDRAIL_MIN_FP_CONFIDENCE", 85),
                require_intel_for_critical: env_bool("LLM_GUARDRAIL_REQUIRE_INTEL_FOR_CRITICAL", true),
                max_severity_without_intel: std::env::var("LLM_GUARDRAIL_MAX_SEVERITY_WITHOUT_INTEL")
                    .ok()
                    .and_then(|s| Severity::parse(&s))
                    .unwrap_or(Severity::High),
            },
            notifier_webhook_url: env_opt("NOTIFIER_WEBHOOK_URL"),
            ingest: IngestConfig {
                deadline: Duration::from_secs(env_parse("INGEST_DEADLINE_SECONDS", 600)),
                ..Default::default()
            },
            ingest_interval: Duration::from_secs(env_parse("INGEST_INTERVAL_MINUTES", 60u64) * 60),
            feeds: FeedSettings {
                urlhaus_url: env_string(
                    "FEED_URLHAUS_URL",
                    "https://urlhaus.abuse.ch/downloads/text_online/",
                ),
                blocklist_url: env_string(
                    "FEED_BLOCKLIST_URL",
                    "https://feodotracker.abuse.ch/downloads/ipblocklist.txt",
                ),
                osv_url: env_string(
                    "FEED_OSV_URL",
                    "https://osv.dev/download/malicious/all.json.gz",
                ),
            },
        }
    }
}

/// Parse a duration argument with an `s`/`m`/`h` suffix ("30m", "24h").
/// A bare number is taken as seconds.
pub fn parse_duration_arg(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (number, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], Some(c.to_ascii_lowercase())),
        _ => (s, None),
    };
    let quantity: u64 = number.parse().ok()?;
    match unit {
        None | Some('s') => Some(Duration::from_secs(quantity)),
        Some('m') => Some(Duration::from_secs(quantity * 60)),
        Some('h') => Some(Duration::from_secs(quantity * 3_600)),
        _ => None,
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env_opt(key) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(%key, %value, %default, "unparseable value, using default");
            default
        }),
        None => default,
    }
}

//! LLM alert triage
//!
//! `triage` drives the whole guardrailed pipeline for one alert: pre-filter
//! (may settle without an LLM call), prompt construction, the resilient LLM
//! exchange, reply parsing, and the post-filter. Every outcome lands in the
//! metrics registry.

use crate::error::TriageError;
use crate::guardrails::{post_filter, pre_filter, GuardrailConfig, LlmVerdict};
use crate::metrics::Metrics;
use crate::resilience::ResilientClient;
use crate::{ThreatContext, TriageResult};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// LLM endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You are a senior Security Operations Center analyst specializing in endpoint \
     detection alerts and threat intelligence. You reply with a single JSON object \
     and nothing else.";

/// Guardrailed LLM triager.
pub struct LlmTriager {
    config: LlmConfig,
    guardrails: GuardrailConfig,
    client: ResilientClient,
    metrics: Arc<Metrics>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmTriager {
    pub fn new(
        config: LlmConfig,
        guardrails: GuardrailConfig,
        client: ResilientClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { config, guardrails, client, metrics }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Triage one alert context into a validated verdict.
    pub async fn triage(&self, context: &ThreatContext) -> Result<TriageResult, TriageError> {
        let started = std::time::Instant::now();
        let outcome = self.run(context).await;
        self.metrics
            .triage_duration
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok((result, label)) => {
                self.metrics.triage_requests.incr(label);
                self.metrics.triage_severity.incr(result.severity.as_str());
                self.metrics.triage_confidence.observe(result.confidence as f64);
                if result.false_positive {
                    self.metrics.false_positives.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    alert_id = %context.alert.alert_id,
                    severity = result.severity.as_str(),
                    confidence = result.confidence,
                    false_positive = result.false_positive,
                    outcome = label,
                    "alert triaged"
                );
                Ok(result)
            }
            Err(err) => {
                let label = if matches!(err, TriageError::Disabled) { "disabled" } else { "error" };
                self.metrics.triage_requests.incr(label);
                self.metrics.triage_errors.incr(err.kind());
                Err(err)
            }
        }
    }

    async fn run(&self, context: &ThreatContext) -> Result<(TriageResult, &'static str), TriageError> {
        if !self.config.enabled {
            return Err(TriageError::Disabled);
        }

        let (settled, actions) = pre_filter(&context.alert, &context.indicators);
        for action in &actions {
            self.metrics.record_guardrail("pre", action);
        }
        if let Some(result) = settled {
            return Ok((result, "skipped_pre_filter"));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(context)},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        let bearer = (!self.config.api_key.is_empty()).then_some(self.config.api_key.as_str());
        let reply = self.client.post_json(&self.config.api_url, bearer, &body).await?;

        let content = extract_content(&reply)?;
        debug!(alert_id = %context.alert.alert_id, "llm reply received");
        let raw = parse_verdict(&content)?;

        let (result, actions) = post_filter(raw, &context.indicators, &self.guardrails);
        for action in &actions {
            self.metrics.record_guardrail("post", action);
        }
        Ok((result, "completed"))
    }
}

/// `.choices[0].message.content` of a chat-completions reply.
fn extract_content(reply: &str) -> Result<String, TriageError> {
    let completion: ChatCompletion =
        serde_json::from_str(reply).map_err(|e| TriageError::Parse(e.to_string()))?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| TriageError::Parse("reply carried no choices".to_string()))
}

/// Parse the model's verdict, tolerating a fenced code block around the
/// JSON (labeled ```json or bare ```); the tolerance is deliberate policy,
/// models wrap output in fences regardless of instructions.
fn parse_verdict(content: &str) -> Result<LlmVerdict, TriageError> {
    let fence = regex::Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
        .map_err(|e| TriageError::Parse(e.to_string()))?;
    let body = fence
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
        .trim();

    serde_json::from_str(body).map_err(|e| TriageError::Parse(e.to_string()))
}

/// Deterministic prompt: the alert, the endpoint, every enriched indicator
/// with its catalog facts, the output schema, and three worked examples.
pub fn build_prompt(context: &ThreatContext) -> String {
    let alert = &context.alert;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "Triage the following endpoint detection alert.\n");
    let _ = writeln!(prompt, "## Alert");
    let _ = writeln!(prompt, "- id: {}", alert.alert_id);
    let _ = writeln!(prompt, "- threat name: {}", alert.threat_name);
    let _ = writeln!(prompt, "- classification: {}", alert.classification);
    let _ = writeln!(prompt, "- detected at: {}", alert.timestamp);
    let _ = writeln!(
        prompt,
        "- endpoint: {} ({}, agent {})",
        alert.endpoint.computer_name, alert.endpoint.os_type, alert.endpoint.agent_version
    );

    let _ = writeln!(prompt, "\n## Indicators ({})", context.indicators.len());
    for indicator in &context.indicators {
        let _ = write!(prompt, "- [{}] {}", indicator.type_tag, indicator.value);
        if indicator.in_database {
            let _ = write!(
                prompt,
                " — KNOWN to threat intelligence: sources [{}], threat types [{}], tags [{}]",
                indicator.sources.join(", "),
                indicator.threat_types.join(", "),
                indicator.tags.join(", ")
            );
            if let Some(first_seen) = indicator.first_seen {
                let _ = write!(prompt, ", first seen {}", first_seen.to_rfc3339());
            }
        } else {
            let _ = write!(prompt, " — not present in threat intelligence");
        }
        let _ = writeln!(prompt);
    }

    prompt.push_str(OUTPUT_CONTRACT);
    prompt
}

const OUTPUT_CONTRACT: &str = r#"
## Output
Reply with exactly one JSON object, no prose around it:
{"severity": "critical|high|medium|low|info", "priority": 1-5, "summary": "<one sentence>", "analysis": "<a few sentences>", "recommended_actions": ["..."], "false_positive": true|false, "confidence": 0-100}

Priority must track severity (critical=1, high=2, medium=3, low=4, info=5).

## Examples

Alert indicator 185.220.101.4 is known C2 infrastructure reported by two feeds:
{"severity": "high", "priority": 2, "summary": "Endpoint contacted a known command-and-control server.", "analysis": "The destination address is listed as active C2 infrastructure by multiple independent feeds. Outbound contact from a workstation is a strong compromise signal.", "recommended_actions": ["Isolate the endpoint", "Block the address at the perimeter", "Review process activity around the connection"], "false_positive": false, "confidence": 90}

Alert indicator ctldl.windowsupdate.com with no threat intelligence match:
{"severity": "info", "priority": 5, "summary": "Traffic to Microsoft update infrastructure.", "analysis": "The only indicator is a well-known OS update endpoint and nothing matches threat intelligence. The detection rule fired on benign maintenance traffic.", "recommended_actions": ["Tune the triggering detection rule"], "false_positive": true, "confidence": 92}

Alert indicator 45.77.39.12 with no threat intelligence match and a generic detection name:
{"severity": "medium", "priority": 3, "summary": "Unrecognized external address with no corroborating intelligence.", "analysis": "The address is not present in any feed and the detection is generic. Compromise cannot be confirmed or excluded from the available evidence.", "recommended_actions": ["Monitor the endpoint", "Collect network telemetry for the address"], "false_positive": false, "confidence": 55}
"#;

//! Process-local metrics
//!
//! One registry constructed at startup and shared by `Arc`; increments are
//! atomic and lock-free on the hot paths. `export_prometheus` renders the
//! text exposition served at `GET /metrics`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter keyed by one label value.
#[derive(Debug, Default)]
pub struct LabeledCounter {
    counts: DashMap<String, AtomicU64>,
}

impl LabeledCounter {
    pub fn incr(&self, label: &str) {
        self.counts
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, label: &str, n: u64) {
        self.counts
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, label: &str) -> u64 {
        self.counts
            .get(label)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }
}

/// Fixed-bucket histogram; `observe` is a handful of atomic adds.
#[derive(Debug)]
pub struct BucketHistogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of observations scaled by 1e6 to stay integral.
    sum_micros: AtomicU64,
    total: AtomicU64,
}

impl BucketHistogram {
    pub fn new(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            counts: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros.fetch_add((value * 1e6) as u64, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String, name: &str) {
        for (i, bound) in self.bounds.iter().enumerate() {
            out.push_str(&format!(
                "{name}_bucket{{le=\"{}\"}} {}\n",
                bound,
                self.counts[i].load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{name}_bucket{{le=\"+Inf\"}} {}\n",
            self.total.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "{name}_sum {}\n",
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6
        ));
        out.push_str(&format!("{name}_count {}\n", self.total.load(Ordering::Relaxed)));
    }
}

/// Metrics registry for the whole process.
#[derive(Debug)]
pub struct Metrics {
    // Ingestion
    pub ingest_runs: AtomicU64,
    pub iocs_received: LabeledCounter,
    pub provider_failures: LabeledCounter,
    pub iocs_persisted: AtomicU64,
    pub batches_persisted: AtomicU64,
    pub batches_dropped: AtomicU64,

    // Triage
    pub triage_requests: LabeledCounter,
    pub triage_errors: LabeledCounter,
    pub triage_duration: BucketHistogram,
    pub triage_severity: LabeledCounter,
    pub triage_confidence: BucketHistogram,
    pub false_positives: AtomicU64,

    // Guardrails, keyed "stage:action"
    pub guardrail_actions: LabeledCounter,

    // Circuit breaker, keyed "from:to"
    pub circuit_transitions: LabeledCounter,

    // Enrichment surface
    pub webhook_alerts: AtomicU64,
    pub notifier_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ingest_runs: AtomicU64::new(0),
            iocs_received: LabeledCounter::default(),
            provider_failures: LabeledCounter::default(),
            iocs_persisted: AtomicU64::new(0),
            batches_persisted: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            triage_requests: LabeledCounter::default(),
            triage_errors: LabeledCounter::default(),
            triage_duration: BucketHistogram::new(&[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            triage_severity: LabeledCounter::default(),
            triage_confidence: BucketHistogram::new(&[20.0, 40.0, 60.0, 80.0, 90.0, 100.0]),
            false_positives: AtomicU64::new(0),
            guardrail_actions: LabeledCounter::default(),
            circuit_transitions: LabeledCounter::default(),
            webhook_alerts: AtomicU64::new(0),
            notifier_failures: AtomicU64::new(0),
        }
    }

    pub fn record_guardrail(&self, stage: &str, action: &str) {
        self.guardrail_actions.incr(&format!("{stage}:{action}"));
    }

    pub fn record_circuit_transition(&self, from: &str, to: &str) {
        self.circuit_transitions.incr(&format!("{from}:{to}"));
    }

    /// Generate Prometheus metrics output.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP argus_ingest_runs_total Completed ingestion runs\n");
        out.push_str("# TYPE argus_ingest_runs_total counter\n");
        out.push_str(&format!(
            "argus_ingest_runs_total {}\n",
            self.ingest_runs.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_iocs_received_total Indicators produced by each feed\n");
        out.push_str("# TYPE argus_iocs_received_total counter\n");
        for (provider, count) in self.iocs_received.snapshot() {
            out.push_str(&format!(
                "argus_iocs_received_total{{provider=\"{provider}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_provider_failures_total Failed feed fetches\n");
        out.push_str("# TYPE argus_provider_failures_total counter\n");
        for (provider, count) in self.provider_failures.snapshot() {
            out.push_str(&format!(
                "argus_provider_failures_total{{provider=\"{provider}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_iocs_persisted_total Indicators written to the catalog\n");
        out.push_str("# TYPE argus_iocs_persisted_total counter\n");
        out.push_str(&format!(
            "argus_iocs_persisted_total {}\n",
            self.iocs_persisted.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_batches_persisted_total Catalog batches flushed\n");
        out.push_str("# TYPE argus_batches_persisted_total counter\n");
        out.push_str(&format!(
            "argus_batches_persisted_total {}\n",
            self.batches_persisted.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_batches_dropped_total Catalog batches lost to storage errors\n");
        out.push_str("# TYPE argus_batches_dropped_total counter\n");
        out.push_str(&format!(
            "argus_batches_dropped_total {}\n",
            self.batches_dropped.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_triage_requests_total Triage calls by outcome\n");
        out.push_str("# TYPE argus_triage_requests_total counter\n");
        for (outcome, count) in self.triage_requests.snapshot() {
            out.push_str(&format!(
                "argus_triage_requests_total{{outcome=\"{outcome}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_triage_errors_total Triage failures by kind\n");
        out.push_str("# TYPE argus_triage_errors_total counter\n");
        for (kind, count) in self.triage_errors.snapshot() {
            out.push_str(&format!("argus_triage_errors_total{{kind=\"{kind}\"}} {count}\n"));
        }

        out.push_str("\n# HELP argus_triage_duration_seconds Triage latency\n");
        out.push_str("# TYPE argus_triage_duration_seconds histogram\n");
        self.triage_duration.render(&mut out, "argus_triage_duration_seconds");

        out.push_str("\n# HELP argus_triage_severity_total Triage results by severity\n");
        out.push_str("# TYPE argus_triage_severity_total counter\n");
        for (severity, count) in self.triage_severity.snapshot() {
            out.push_str(&format!(
                "argus_triage_severity_total{{severity=\"{severity}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_triage_confidence Confidence of triage results\n");
        out.push_str("# TYPE argus_triage_confidence histogram\n");
        self.triage_confidence.render(&mut out, "argus_triage_confidence");

        out.push_str("\n# HELP argus_false_positives_total Alerts triaged as false positives\n");
        out.push_str("# TYPE argus_false_positives_total counter\n");
        out.push_str(&format!(
            "argus_false_positives_total {}\n",
            self.false_positives.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_guardrail_actions_total Guardrail rule activations\n");
        out.push_str("# TYPE argus_guardrail_actions_total counter\n");
        for (key, count) in self.guardrail_actions.snapshot() {
            let (stage, action) = key.split_once(':').unwrap_or((key.as_str(), ""));
            out.push_str(&format!(
                "argus_guardrail_actions_total{{stage=\"{stage}\",action=\"{action}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_circuit_transitions_total Circuit breaker state transitions\n");
        out.push_str("# TYPE argus_circuit_transitions_total counter\n");
        for (key, count) in self.circuit_transitions.snapshot() {
            let (from, to) = key.split_once(':').unwrap_or((key.as_str(), ""));
            out.push_str(&format!(
                "argus_circuit_transitions_total{{from=\"{from}\",to=\"{to}\"}} {count}\n"
            ));
        }

        out.push_str("\n# HELP argus_webhook_alerts_total Alerts received on the EDR webhook\n");
        out.push_str("# TYPE argus_webhook_alerts_total counter\n");
        out.push_str(&format!(
            "argus_webhook_alerts_total {}\n",
            self.webhook_alerts.load(Ordering::Relaxed)
        ));

        out.push_str("\n# HELP argus_notifier_failures_total Best-effort notifier deliveries that failed\n");
        out.push_str("# TYPE argus_notifier_failures_total counter\n");
        out.push_str(&format!(
            "argus_notifier_failures_total {}\n",
            self.notifier_failures.load(Ordering::Relaxed)
        ));

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

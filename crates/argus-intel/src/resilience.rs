//! Resilient outbound HTTP
//!
//! Wraps an HTTP exchange in two composed guards: exponential-backoff retry
//! on the inside, a circuit breaker around the whole retry loop so a fully
//! exhausted retry budget counts as one outcome. Either guard can be
//! disabled at startup; both are on by default.

use crate::error::OutboundError;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry guard settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first attempt; a count, not an elapsed cap.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures that trip `closed` to `open`.
    pub max_failures: u32,
    /// Time spent rejecting in `open` before a probe is allowed.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker with a single-probe `half_open` state.
///
/// Transitions happen under one lock so the walk
/// `closed ⇄ open → half_open → {closed | open}` is observed atomically;
/// in `half_open` at most one request is ever in flight.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Arc<Metrics>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            metrics,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask to send one request. `Err(CircuitOpen)` rejections are immediate.
    pub fn try_acquire(&self) -> Result<(), OutboundError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if expired {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(OutboundError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(OutboundError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        warn!(from = from.as_str(), to = to.as_str(), "circuit breaker transition");
        self.metrics.record_circuit_transition(from.as_str(), to.as_str());
    }
}

/// HTTP client with both guards composed around `post_json`.
pub struct ResilientClient {
    client: reqwest::Client,
    retry: RetryConfig,
    breaker: Option<CircuitBreaker>,
    request_timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
        request_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let breaker = breaker
            .enabled
            .then(|| CircuitBreaker::new(breaker, metrics));
        Self {
            client: reqwest::Client::new(),
            retry,
            breaker,
            request_timeout,
        }
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    /// POST a JSON body, returning the response body on a 2xx.
    ///
    /// The request is rebuilt from `body` on every attempt, so retries never
    /// send a half-consumed payload.
    pub async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<String, OutboundError> {
        if let Some(breaker) = &self.breaker {
            breaker.try_acquire()?;
        }

        let result = self.post_with_retry(url, bearer, body).await;

        if let Some(breaker) = &self.breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }
        result
    }

    async fn post_with_retry(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<String, OutboundError> {
        let max_attempts = if self.retry.enabled { self.retry.max_retries + 1 } else { 1 };
        let mut interval = self.retry.initial_interval;

        for attempt in 1..=max_attempts {
            match self.send_once(url, bearer, body).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    debug!(%url, attempt, backoff_ms = interval.as_millis() as u64, error = %err, "retrying outbound request");
                    tokio::time::sleep(interval).await;
                    interval = (interval * 2).min(self.retry.max_interval);
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    async fn send_once(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<String, OutboundError> {
        let mut request = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                OutboundError::Timeout
            } else {
                OutboundError::Connection(err.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| OutboundError::Connection(err.to_string()))?;

        if status.is_success() {
            Ok(text)
        } else {
            let mut body = text;
            body.truncate(512);
            Err(OutboundError::Status { status: status.as_u16(), body })
        }
    }
}

/// Retry on transport trouble and throttling/transient statuses, never on
/// other 4xx.
fn is_retryable(err: &OutboundError) -> bool {
    match err {
        OutboundError::Timeout | OutboundError::Connection(_) => true,
        OutboundError::Status { status, .. } => {
            matches!(status, 429 | 500 | 502 | 503 | 504)
        }
        OutboundError::CircuitOpen => false,
    }
}

//! Ingestion coordinator
//!
//! One producer task per feed provider, all pushing onto a single bounded
//! channel; one consumer draining it into batched catalog writes. The
//! bounded channel applies backpressure from slow persistence onto fast
//! producers; the periodic flush bounds latency when feeds trickle; the
//! uniqueness key makes re-runs safe.

use crate::metrics::Metrics;
use crate::providers::FeedProvider;
use crate::repository::IocRepository;
use crate::Ioc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Capacity of the producer/consumer channel.
    pub channel_capacity: usize,
    /// Consumer buffer size that forces a flush.
    pub batch_size: usize,
    /// Periodic flush of a non-empty buffer.
    pub flush_interval: Duration,
    /// Overall deadline for one run.
    pub deadline: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 2_000,
            batch_size: 2_000,
            flush_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(600),
        }
    }
}

/// Summary of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Indicators handed to the channel by all providers.
    pub received: u64,
    /// Rows actually inserted (duplicates excluded).
    pub persisted: u64,
    pub batches_flushed: u64,
    pub batches_dropped: u64,
    /// Feeds that failed this run, with the reason.
    pub provider_errors: Vec<(String, String)>,
    pub elapsed: Duration,
}

/// Fans providers out, merges their output into the catalog.
pub struct IngestCoordinator {
    repository: Arc<dyn IocRepository>,
    providers: Vec<Arc<dyn FeedProvider>>,
    config: IngestConfig,
    metrics: Arc<Metrics>,
}

impl IngestCoordinator {
    pub fn new(
        repository: Arc<dyn IocRepository>,
        providers: Vec<Arc<dyn FeedProvider>>,
        config: IngestConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { repository, providers, config, metrics }
    }

    /// Run one full ingestion pass over every provider.
    ///
    /// A failing provider is logged and skipped. On deadline expiry
    /// producers stop sending; whatever reached the consumer is still
    /// flushed, partial ingestion beats none.
    pub async fn run(&self) -> IngestReport {
        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.deadline;
        let (tx, rx) = mpsc::channel::<Ioc>(self.config.channel_capacity);

        let mut producers: JoinSet<(String, Result<u64, String>)> = JoinSet::new();
        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let tx = tx.clone();
            producers.spawn(async move {
                let name = provider.name().to_string();
                let fetched = match tokio::time::timeout_at(deadline, provider.fetch()).await {
                    Err(_) => return (name, Err("deadline exceeded".to_string())),
                    Ok(Err(err)) => return (name, Err(err.to_string())),
                    Ok(Ok(iocs)) => iocs,
                };

                let mut sent = 0u64;
                for ioc in fetched {
                    tokio::select! {
                        res = tx.send(ioc) => {
                            if res.is_err() {
                                break;
                            }
                            sent += 1;
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            warn!(feed = %name, sent, "ingest deadline reached, abandoning send");
                            break;
                        }
                    }
                }
                (name, Ok(sent))
            });
        }
        // The consumer exits once every producer clone is gone.
        drop(tx);

        let consumer = tokio::spawn(consume(
            rx,
            Arc::clone(&self.repository),
            self.config.clone(),
            Arc::clone(&self.metrics),
        ));

        let mut report = IngestReport::default();
        while let Some(joined) = producers.join_next().await {
            match joined {
                Ok((name, Ok(sent))) => {
                    self.metrics.iocs_received.add(&name, sent);
                    report.received += sent;
                }
                Ok((name, Err(reason))) => {
                    error!(feed = %name, %reason, "feed provider failed");
                    self.metrics.provider_failures.incr(&name);
                    report.provider_errors.push((name, reason));
                }
                Err(join_err) => {
                    error!(error = %join_err, "feed producer task aborted");
                }
            }
        }

        match consumer.await {
            Ok(stats) => {
                report.persisted = stats.persisted;
                report.batches_flushed = stats.flushed;
                report.batches_dropped = stats.dropped;
            }
            Err(join_err) => error!(error = %join_err, "ingest consumer task aborted"),
        }

        report.elapsed = started.elapsed();
        self.metrics.ingest_runs.fetch_add(1, Ordering::Relaxed);
        info!(
            received = report.received,
            persisted = report.persisted,
            batches = report.batches_flushed,
            dropped_batches = report.batches_dropped,
            failed_feeds = report.provider_errors.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingestion run finished"
        );
        report
    }
}

#[derive(Default)]
struct ConsumeStats {
    persisted: u64,
    flushed: u64,
    dropped: u64,
}

async fn consume(
    mut rx: mpsc::Receiver<Ioc>,
    repository: Arc<dyn IocRepository>,
    config: IngestConfig,
    metrics: Arc<Metrics>,
) -> ConsumeStats {
    let mut buffer: Vec<Ioc> = Vec::with_capacity(config.batch_size);
    let mut stats = ConsumeStats::default();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(ioc) => {
                    buffer.push(ioc);
                    if buffer.len() >= config.batch_size {
                        flush(&repository, &mut buffer, &mut stats, &metrics).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&repository, &mut buffer, &mut stats, &metrics).await;
                }
            }
        }
    }

    if !buffer.is_empty() {
        flush(&repository, &mut buffer, &mut stats, &metrics).await;
    }
    stats
}

/// Write out the buffer. A failed batch is logged and dropped; the run
/// carries on with the next one.
async fn flush(
    repository: &Arc<dyn IocRepository>,
    buffer: &mut Vec<Ioc>,
    stats: &mut ConsumeStats,
    metrics: &Metrics,
) {
    let batch = std::mem::take(buffer);
    let size = batch.len();
    match repository.save_batch(&batch).await {
        Ok(inserted) => {
            stats.persisted += inserted;
            stats.flushed += 1;
            metrics.iocs_persisted.fetch_add(inserted, Ordering::Relaxed);
            metrics.batches_persisted.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            warn!(size, error = %err, "dropping batch after failed catalog write");
            stats.dropped += 1;
            metrics.batches_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

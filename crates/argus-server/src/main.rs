//! Argus Threat Intelligence Platform - Main Entry Point

use argus_api::{build_router, ApiState};
use argus_intel::config::FeedSettings;
use argus_intel::enrichment::EnrichmentHandler;
use argus_intel::export::Exporter;
use argus_intel::ingest::IngestCoordinator;
use argus_intel::metrics::Metrics;
use argus_intel::notify::{Notifier, WebhookNotifier};
use argus_intel::providers::{AdvisoryArchiveProvider, FeedProvider, HostListProvider};
use argus_intel::repository::{IocRepository, MemoryIocRepository, PgIocRepository};
use argus_intel::resilience::ResilientClient;
use argus_intel::triage::LlmTriager;
use argus_intel::AppConfig;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Argus Threat Intelligence Platform v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    let metrics = Arc::new(Metrics::new());

    // Collaborators in dependency order: notifier, repository, triager, handler.
    let notifier: Option<Arc<dyn Notifier>> = config
        .notifier_webhook_url
        .as_deref()
        .map(|url| Arc::new(WebhookNotifier::new(url)) as Arc<dyn Notifier>);
    if notifier.is_none() {
        tracing::info!("no notifier webhook configured, alert delivery disabled");
    }

    let repository: Arc<dyn IocRepository> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await?;
            tracing::info!("connected to the IOC catalog");
            Arc::new(PgIocRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, falling back to the in-memory catalog");
            Arc::new(MemoryIocRepository::new())
        }
    };

    let llm_client = ResilientClient::new(
        config.retry.clone(),
        config.breaker.clone(),
        Duration::from_secs(30),
        metrics.clone(),
    );
    let triager = Arc::new(LlmTriager::new(
        config.llm.clone(),
        config.guardrails.clone(),
        llm_client,
        metrics.clone(),
    ));
    tracing::info!(enabled = triager.enabled(), "llm triage configured");

    let handler = Arc::new(EnrichmentHandler::new(
        repository.clone(),
        triager,
        notifier,
        metrics.clone(),
    ));
    let exporter = Arc::new(Exporter::new(repository.clone()));

    // Periodic feed ingestion; the first run fires right away.
    let coordinator = IngestCoordinator::new(
        repository.clone(),
        build_providers(&config.feeds),
        config.ingest.clone(),
        metrics.clone(),
    );
    let ingest_interval = config.ingest_interval;
    tokio::spawn(async move {
        loop {
            coordinator.run().await;
            tokio::time::sleep(ingest_interval).await;
        }
    });

    let state = ApiState {
        handler,
        exporter,
        metrics,
        auth_token: config.api_auth_token.clone(),
        service: "argus-threat-intel".to_string(),
    };
    if state.auth_token.is_none() {
        tracing::warn!("REST_API_AUTH_TOKEN not set, API auth disabled");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(%addr, "api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_providers(feeds: &FeedSettings) -> Vec<Arc<dyn FeedProvider>> {
    vec![
        Arc::new(HostListProvider::new(
            "urlhaus",
            &feeds.urlhaus_url,
            "malware_download",
            vec!["urlhaus".to_string()],
        )),
        Arc::new(HostListProvider::new(
            "feodo-tracker",
            &feeds.blocklist_url,
            "c2_server",
            vec!["botnet".to_string(), "c2".to_string()],
        )),
        Arc::new(AdvisoryArchiveProvider::new("osv", &feeds.osv_url)),
    ]
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

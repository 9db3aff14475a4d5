//! Argus REST API
//!
//! HTTP surface over the enrichment handler and export engine: health,
//! catalog queries, SIEM feed export, the EDR webhook, and Prometheus
//! metrics. Everything except the health check sits behind bearer-token
//! auth when a token is configured.

pub mod middleware;
pub mod models;
pub mod routes;

use argus_intel::enrichment::EnrichmentHandler;
use argus_intel::export::Exporter;
use argus_intel::metrics::Metrics;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub use models::*;

/// Shared state behind every route.
pub struct ApiState {
    pub handler: Arc<EnrichmentHandler>,
    pub exporter: Arc<Exporter>,
    pub metrics: Arc<Metrics>,
    /// Bearer secret; `None` disables auth (development).
    pub auth_token: Option<String>,
    pub service: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Argus Threat Intelligence API",
        version = "1.0.0",
        description = "IOC catalog queries, SIEM feed export and EDR alert enrichment",
        license(name = "Apache-2.0")
    ),
    paths(
        routes::health::health_check,
        routes::iocs::check,
        routes::iocs::search,
        routes::iocs::feed,
        routes::webhooks::sentinelone,
    ),
    components(
        schemas(
            models::ErrorResponse,
            models::HealthResponse,
            models::Sighting,
            models::CheckResponse,
            models::SearchResponse,
            models::WebhookResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check"),
        (name = "iocs", description = "Catalog queries and feed export"),
        (name = "webhooks", description = "EDR alert intake")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .route("/api/v1/iocs/check", get(routes::iocs::check))
        .route("/api/v1/iocs/search", get(routes::iocs::search))
        .route("/api/v1/iocs/feed", get(routes::iocs::feed))
        .route("/api/v1/webhooks/sentinelone", post(routes::webhooks::sentinelone))
        .route("/metrics", get(routes::metrics::exposition))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_bearer,
        ));

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_intel::guardrails::GuardrailConfig;
    use argus_intel::repository::{IocRepository, MemoryIocRepository};
    use argus_intel::resilience::{CircuitBreakerConfig, ResilientClient, RetryConfig};
    use argus_intel::triage::{LlmConfig, LlmTriager};
    use argus_intel::{Ioc, IocType};
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};

    fn test_state(auth_token: Option<&str>) -> (ApiState, Arc<MemoryIocRepository>) {
        let repository = Arc::new(MemoryIocRepository::new());
        let metrics = Arc::new(Metrics::new());
        let client = ResilientClient::new(
            RetryConfig { enabled: false, ..Default::default() },
            CircuitBreakerConfig { enabled: false, ..Default::default() },
            std::time::Duration::from_secs(1),
            metrics.clone(),
        );
        let triager = Arc::new(LlmTriager::new(
            LlmConfig { enabled: false, ..Default::default() },
            GuardrailConfig::default(),
            client,
            metrics.clone(),
        ));
        let handler = Arc::new(EnrichmentHandler::new(
            repository.clone(),
            triager,
            None,
            metrics.clone(),
        ));
        let exporter = Arc::new(Exporter::new(repository.clone()));
        let state = ApiState {
            handler,
            exporter,
            metrics,
            auth_token: auth_token.map(String::from),
            service: "argus-test".to_string(),
        };
        (state, repository)
    }

    fn server(auth_token: Option<&str>) -> (TestServer, Arc<MemoryIocRepository>) {
        let (state, repository) = test_state(auth_token);
        (TestServer::new(build_router(state)).unwrap(), repository)
    }

    fn ioc(value: &str, ioc_type: IocType, source: &str, version: &str) -> Ioc {
        Ioc {
            value: value.to_string(),
            ioc_type,
            source: source.to_string(),
            threat_type: "c2_server".to_string(),
            tags: vec!["test".to_string()],
            version: version.to_string(),
            first_seen: chrono::Utc::now(),
            date_ingested: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let (server, _) = server(Some("secret"));
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "argus-test");
    }

    #[tokio::test]
    async fn test_check_requires_value() {
        let (server, _) = server(None);
        let response = server.get("/api/v1/iocs/check").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_hit_and_miss() {
        let (server, repository) = server(None);
        repository
            .save_batch(&[ioc("203.0.113.9", IocType::Ip, "feodo-tracker", "")])
            .await
            .unwrap();

        let response = server
            .get("/api/v1/iocs/check")
            .add_query_param("value", "203.0.113.9")
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["exists"], true);
        assert_eq!(body["type"], "ip");
        assert_eq!(body["source"], "feodo-tracker");

        let response = server
            .get("/api/v1/iocs/check")
            .add_query_param("value", "198.51.100.1")
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["exists"], false);
        assert_eq!(body["value"], "198.51.100.1");
    }

    #[tokio::test]
    async fn test_search_versioned_package() {
        let (server, repository) = server(None);
        repository
            .save_batch(&[
                ioc("lodash", IocType::Package, "osv", ""),
                ioc("lodash", IocType::Package, "osv-mirror", "4.17.0"),
            ])
            .await
            .unwrap();

        let response = server
            .get("/api/v1/iocs/search")
            .add_query_param("value", "lodash@4.17.0")
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["count"], 2);
        assert_eq!(body["sightings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_feed_formats() {
        let (server, repository) = server(None);
        repository
            .save_batch(&[ioc("203.0.113.9", IocType::Ip, "urlhaus", "")])
            .await
            .unwrap();

        let response = server
            .get("/api/v1/iocs/feed")
            .add_query_param("format", "cef")
            .await;
        response.assert_status_ok();
        assert!(response.text().starts_with("CEF:0|Argus|"));

        let response = server
            .get("/api/v1/iocs/feed")
            .add_query_params(&[("format", "stix"), ("since", "1h")])
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["type"], "bundle");
        assert_eq!(body["objects"].as_array().unwrap().len(), 1);

        let response = server
            .get("/api/v1/iocs/feed")
            .add_query_param("format", "json")
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);

        let response = server
            .get("/api/v1/iocs/feed")
            .add_query_param("format", "xml")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server
            .get("/api/v1/iocs/feed")
            .add_query_params(&[("format", "cef"), ("since", "tomorrow")])
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_envelope() {
        let (server, _) = server(None);
        let response = server
            .post("/api/v1/webhooks/sentinelone")
            .json(&json!({
                "alert_id": "a-42",
                "threat_name": "Suspicious Connection",
                "indicators": [{"type": "IPV4", "value": "203.0.113.9"}]
            }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "received");
        assert_eq!(body["alert_id"], "a-42");
        assert_eq!(body["indicators_enriched"], 1);
        assert_eq!(body["indicators_in_db"], 0);
        assert_eq!(body["llm_triaged"], false);
    }

    #[tokio::test]
    async fn test_webhook_rejects_invalid_json() {
        let (server, _) = server(None);
        let response = server
            .post("/api/v1/webhooks/sentinelone")
            .text("{not json")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bearer_auth_guards_every_other_route() {
        let (server, _) = server(Some("secret"));

        let response = server.get("/api/v1/iocs/check?value=x").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server.get("/metrics").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server
            .get("/api/v1/iocs/check?value=x")
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer secret"),
            )
            .await;
        response.assert_status_ok();

        let response = server
            .get("/metrics")
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer wrong"),
            )
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let (server, _) = server(None);
        // A webhook alert shows up in the counters.
        server
            .post("/api/v1/webhooks/sentinelone")
            .json(&json!({"alert_id": "a-1", "indicators": []}))
            .await
            .assert_status_ok();

        let response = server.get("/metrics").await;
        response.assert_status_ok();
        assert!(response.text().contains("argus_webhook_alerts_total 1"));
    }
}

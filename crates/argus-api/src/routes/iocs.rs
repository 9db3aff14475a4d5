//! IOC query endpoints: point lookup, aggregated search, feed export

use crate::models::{CheckResponse, ErrorResponse, SearchResponse};
use crate::ApiState;
use argus_intel::config::parse_duration_arg;
use argus_intel::export::ExportFormat;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ValueParams {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub format: Option<String>,
    pub since: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

fn storage_unavailable(err: argus_intel::IntelError) -> Response {
    tracing::error!(error = %err, "catalog unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("catalog unavailable")),
    )
        .into_response()
}

/// Point lookup: does any catalog record carry this value?
#[utoipa::path(
    get,
    path = "/api/v1/iocs/check",
    params(("value" = String, Query, description = "Indicator value to look up")),
    responses(
        (status = 200, description = "Lookup result", body = CheckResponse),
        (status = 400, description = "Missing value parameter", body = ErrorResponse)
    ),
    tag = "iocs"
)]
pub async fn check(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ValueParams>,
) -> Response {
    let Some(value) = params.value.filter(|v| !v.is_empty()) else {
        return bad_request("missing required parameter: value");
    };

    match state.handler.check(&value).await {
        Ok(Some(ioc)) => Json(CheckResponse::hit(ioc)).into_response(),
        Ok(None) => Json(CheckResponse::miss(&value)).into_response(),
        Err(err) => storage_unavailable(err),
    }
}

/// Aggregated search over all sightings of a value, `name@version` aware.
#[utoipa::path(
    get,
    path = "/api/v1/iocs/search",
    params(("value" = String, Query, description = "Value, optionally suffixed @version")),
    responses(
        (status = 200, description = "Aggregated sightings", body = SearchResponse),
        (status = 400, description = "Missing value parameter", body = ErrorResponse)
    ),
    tag = "iocs"
)]
pub async fn search(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ValueParams>,
) -> Response {
    let Some(value) = params.value.filter(|v| !v.is_empty()) else {
        return bad_request("missing required parameter: value");
    };

    match state.handler.search(&value).await {
        Ok(detail) => Json(SearchResponse::from(detail)).into_response(),
        Err(err) => storage_unavailable(err),
    }
}

/// Export the recent catalog window in a SIEM format.
#[utoipa::path(
    get,
    path = "/api/v1/iocs/feed",
    params(
        ("format" = String, Query, description = "cef, stix or json"),
        ("since" = Option<String>, Query, description = "Window size, e.g. 30m or 24h (default 24h)")
    ),
    responses(
        (status = 200, description = "Rendered feed"),
        (status = 400, description = "Unknown format or bad window", body = ErrorResponse),
        (status = 501, description = "Format accepted but not implemented", body = ErrorResponse)
    ),
    tag = "iocs"
)]
pub async fn feed(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<FeedParams>,
) -> Response {
    let Some(format) = params.format.as_deref().and_then(ExportFormat::parse) else {
        return bad_request("unknown feed format, expected cef, stix or json");
    };

    let window = match params.since.as_deref() {
        None => std::time::Duration::from_secs(24 * 3_600),
        Some(raw) => match parse_duration_arg(raw) {
            Some(window) => window,
            None => return bad_request("unparseable since parameter, expected e.g. 30m or 24h"),
        },
    };
    let since =
        chrono::Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());

    match format {
        ExportFormat::Json => (
            StatusCode::NOT_IMPLEMENTED,
            Json(ErrorResponse::new("json feed is not implemented")),
        )
            .into_response(),
        ExportFormat::Cef => match state.exporter.export_cef(since).await {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(err) => storage_unavailable(err),
        },
        ExportFormat::Stix => match state.exporter.export_stix(since).await {
            Ok(bundle) => Json(bundle).into_response(),
            Err(err) => storage_unavailable(err),
        },
    }
}

//! EDR alert webhook

use crate::models::WebhookResponse;
use crate::ApiState;
use argus_intel::EdrAlert;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tracing::info;

use crate::models::ErrorResponse;

/// Receive one EDR alert, enrich and triage it.
///
/// Consumers always get a 2xx with a status envelope unless the body was
/// unparseable; enrichment, triage and notification failures degrade inside
/// the pipeline instead of failing the request.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/sentinelone",
    request_body = EdrAlert,
    responses(
        (status = 200, description = "Alert accepted", body = WebhookResponse),
        (status = 400, description = "Unparseable body", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn sentinelone(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<EdrAlert>, JsonRejection>,
) -> Response {
    let Json(alert) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&format!("invalid alert body: {rejection}"))),
            )
                .into_response();
        }
    };

    info!(alert_id = %alert.alert_id, threat = %alert.threat_name, "webhook alert received");
    let outcome = state.handler.handle_alert(alert).await;
    Json(WebhookResponse::from(outcome)).into_response()
}

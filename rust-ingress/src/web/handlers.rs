//! HTTP endpoint handlers.
//!
//! The inbound handler hands the raw body to the notification processor
//! and turns the outcome into a status code. All validation happens in
//! the processor.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::IngressError;
use crate::processor::{NotificationProcessor, Outcome};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub processor: Arc<NotificationProcessor>,
}

impl AppState {
    pub fn new(config: Config, processor: NotificationProcessor) -> Self {
        Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Amazon SNS Inbound Email
// =============================================================================

/// Webhook response body.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// SNS inbound email endpoint.
///
/// The body is taken as raw bytes: SNS posts JSON with a `text/plain`
/// content type.
pub async fn amazon_inbound_email(State(state): State<AppState>, body: Bytes) -> Response {
    match state.processor.process(&body).await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::MailIngested { .. } => StatusCode::NO_CONTENT.into_response(),
            Outcome::SubscriptionConfirmed => (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "confirmed",
                    error: None,
                }),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let label = match status {
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::UNPROCESSABLE_ENTITY => "unprocessable",
            _ => "error",
        };

        (
            status,
            Json(WebhookResponse {
                status: label,
                error: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}

//! Web server module for the SNS inbound email webhook.
//!
//! The router exposes:
//! - `GET /health`
//! - `POST /webhooks/amazon/inbound_emails`, the SNS subscription endpoint
//!
//! Every request is traced and bounded by the handler timeout.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use handlers::{amazon_inbound_email, health, AppState, HealthResponse, WebhookResponse};

/// Path SNS posts notifications to.
pub const INBOUND_EMAIL_PATH: &str = "/webhooks/amazon/inbound_emails";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let timeout = state.config.handler_timeout();

    Router::new()
        .route("/health", get(health))
        .route(INBOUND_EMAIL_PATH, post(amazon_inbound_email))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

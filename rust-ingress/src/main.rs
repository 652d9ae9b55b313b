//! SES Ingress Web Server - SNS endpoint for inbound email.
//!
//! This binary:
//! - Receives SNS notifications for mail accepted by SES
//! - Verifies signatures and the topic allow-list
//! - Confirms subscription handshakes
//! - Resolves the raw mail (inline or S3) and publishes it to RabbitMQ

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ses_ingress::web::{router, AppState};
use ses_ingress::{
    Config, NotificationProcessor, Publisher, S3ObjectStore, SnsMessageVerifier,
    SubscriptionConfirmer, TrustedTopics,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        s3_region = ?config.s3_region,
        request_timeout_ms = config.request_timeout_ms,
        "config_loaded"
    );

    let topics = TrustedTopics::new(config.subscribed_topics.iter());
    if topics.is_empty() {
        warn!("no_subscribed_topics_configured");
    } else {
        info!(trusted_topics = topics.len(), "trusted_topics_loaded");
    }

    let verifier = SnsMessageVerifier::new(config.request_timeout())
        .context("Failed to build certificate HTTP client")?;
    let confirmer = SubscriptionConfirmer::new(config.request_timeout())
        .context("Failed to build subscription HTTP client")?;
    let store = S3ObjectStore::from_env(config.s3_region.clone(), config.request_timeout()).await;
    info!("aws_clients_created");

    // Create RabbitMQ publisher
    let publisher = Publisher::new(config.cloudamqp_url.clone());
    info!("rabbitmq_publisher_created");

    let processor = NotificationProcessor::new(
        Arc::new(verifier),
        topics,
        confirmer,
        Arc::new(store),
        Arc::new(publisher.clone()),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, processor));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Close publisher connection
    publisher.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}

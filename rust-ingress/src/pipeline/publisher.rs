//! Async RabbitMQ publisher feeding the mail pipeline.
//!
//! The publisher keeps one connection and channel shared across requests,
//! reconnecting lazily when the channel drops.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{InboundEmail, MailPipeline, INBOUND_EMAIL_QUEUE};

/// Async RabbitMQ publisher with connection management.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a new publisher with the given RabbitMQ URL.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.queue_declare(
            INBOUND_EMAIL_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare inbound email queue")?;

        info!(queue = INBOUND_EMAIL_QUEUE, "rabbitmq_publisher_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish an inbound email to the inbound_emails queue.
    pub async fn publish_inbound(&self, email: &InboundEmail) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(email).context("Failed to serialize inbound email")?;

        channel
            .basic_publish(
                "",
                INBOUND_EMAIL_QUEUE,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(email.message_id.clone().into()),
            )
            .await
            .context("Failed to publish to inbound email queue")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = INBOUND_EMAIL_QUEUE,
            message_id = %email.message_id,
            original_to = ?email.original_to,
            body_length = body.len(),
            "rabbitmq_inbound_email_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

#[async_trait]
impl MailPipeline for Publisher {
    async fn ingest(&self, raw_email: &[u8]) -> Result<String> {
        let email = InboundEmail::from_raw(raw_email);

        self.publish_inbound(&email).await?;

        Ok(email.message_id)
    }
}

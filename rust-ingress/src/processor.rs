//! Notification processor.
//!
//! Runs one inbound SNS request through the pipeline:
//!
//! ```text
//! parse → verify signature → check topic → confirm subscription | resolve mail → ingest
//! ```
//!
//! Each stage gates the next; the first failure ends the request.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::IngressError;
use crate::pipeline::MailPipeline;
use crate::sns::{EnvelopeType, Notification, NotificationVerifier, SubscriptionConfirmer, TrustedTopics};
use crate::storage::ObjectStore;

/// Successful handling of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The subscription handshake URL was fetched successfully
    SubscriptionConfirmed,
    /// Mail was handed to the pipeline under this identifier
    MailIngested { message_id: String },
}

/// Validates SNS notifications and forwards the mail they carry.
pub struct NotificationProcessor {
    verifier: Arc<dyn NotificationVerifier>,
    topics: TrustedTopics,
    confirmer: SubscriptionConfirmer,
    store: Arc<dyn ObjectStore>,
    pipeline: Arc<dyn MailPipeline>,
}

impl NotificationProcessor {
    pub fn new(
        verifier: Arc<dyn NotificationVerifier>,
        topics: TrustedTopics,
        confirmer: SubscriptionConfirmer,
        store: Arc<dyn ObjectStore>,
        pipeline: Arc<dyn MailPipeline>,
    ) -> Self {
        Self {
            verifier,
            topics,
            confirmer,
            store,
            pipeline,
        }
    }

    /// Process one raw request body.
    pub async fn process(&self, body: &[u8]) -> Result<Outcome, IngressError> {
        let notification = Notification::parse(body).map_err(|e| {
            warn!(error = %e, body_length = body.len(), "sns_notification_parse_failed");
            e
        })?;

        info!(
            kind = notification.kind().as_str(),
            topic = %notification.topic(),
            message_id = %notification.envelope().message_id,
            "sns_notification_received"
        );

        if let Err(e) = self.verifier.verify(notification.envelope()).await {
            warn!(
                topic = %notification.topic(),
                message_id = %notification.envelope().message_id,
                error = %e,
                "sns_signature_invalid"
            );
            return Err(IngressError::Unauthenticated(e));
        }

        if !self.topics.contains(Some(notification.topic())) {
            warn!(topic = %notification.topic(), "sns_topic_untrusted");
            return Err(IngressError::UntrustedTopic(notification.topic().to_string()));
        }

        match notification.kind() {
            EnvelopeType::SubscriptionConfirmation => {
                self.confirmer
                    .confirm(notification.envelope().subscribe_url.as_deref())
                    .await?;
                Ok(Outcome::SubscriptionConfirmed)
            }
            EnvelopeType::Notification => self.ingest_mail(&notification).await,
            EnvelopeType::UnsubscribeConfirmation | EnvelopeType::Other(_) => {
                info!(
                    kind = notification.kind().as_str(),
                    "sns_notification_type_ignored"
                );
                Err(IngressError::UnsupportedType(
                    notification.kind().as_str().to_string(),
                ))
            }
        }
    }

    async fn ingest_mail(&self, notification: &Notification) -> Result<Outcome, IngressError> {
        let Some(raw_email) = notification.mail_content(self.store.as_ref()).await? else {
            warn!(
                message_id = %notification.envelope().message_id,
                "sns_notification_mail_missing"
            );
            return Err(IngressError::NoMailContent);
        };

        let message_id = self.pipeline.ingest(raw_email).await.map_err(|e| {
            error!(
                sns_message_id = %notification.envelope().message_id,
                error = %e,
                "mail_pipeline_ingest_failed"
            );
            IngressError::Pipeline(e)
        })?;

        info!(
            message_id = %message_id,
            raw_email_length = raw_email.len(),
            "mail_ingested"
        );

        Ok(Outcome::MailIngested { message_id })
    }
}

//! Request-scoped SNS notification.
//!
//! A [`Notification`] is built from the raw request body and lives for a
//! single request. The nested SES message and the resolved mail are
//! computed at most once and cached on the value itself.

use std::sync::OnceLock;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::sns::types::{Envelope, EnvelopeType, ReceiptAction, SesMessage, SesNotificationType};
use crate::storage::{EncryptionDescriptor, ObjectLocation, ObjectStore, StoreError};

/// The request body is not a usable SNS envelope.
#[derive(Debug, Error)]
#[error("malformed SNS notification: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Fetching stored mail failed.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the mail content of a notification lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailSource<'a> {
    /// Nothing to ingest
    None,
    /// Content embedded in the SES message
    Inline(&'a str),
    /// Content written to the object store
    Stored(ObjectLocation),
}

/// A parsed SNS notification for the current request.
#[derive(Debug)]
pub struct Notification {
    envelope: Envelope,
    message: OnceLock<Option<SesMessage>>,
    mail: OnceCell<Result<Option<Vec<u8>>, ResolveError>>,
}

impl Notification {
    /// Decode the raw request body.
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let envelope: Envelope = serde_json::from_slice(body)?;

        Ok(Self::from_envelope(envelope))
    }

    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            envelope,
            message: OnceLock::new(),
            mail: OnceCell::new(),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn kind(&self) -> &EnvelopeType {
        &self.envelope.kind
    }

    pub fn topic(&self) -> &str {
        &self.envelope.topic_arn
    }

    /// The SES message nested in the envelope, if it is one.
    pub fn message(&self) -> Option<&SesMessage> {
        self.message
            .get_or_init(|| match serde_json::from_str(&self.envelope.message) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(
                        message_id = %self.envelope.message_id,
                        error = %e,
                        "sns_message_parse_failed"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// First recipient SES delivered the mail to.
    pub fn destination(&self) -> Option<&str> {
        self.message().and_then(SesMessage::destination)
    }

    /// Classify where the mail content lives.
    pub fn mail_source(&self) -> MailSource<'_> {
        if self.envelope.kind != EnvelopeType::Notification {
            return MailSource::None;
        }

        let Some(message) = self.message() else {
            return MailSource::None;
        };

        match (&message.notification_type, message.action()) {
            (SesNotificationType::Received, Some(ReceiptAction::S3(action))) => {
                MailSource::Stored(action.location())
            }
            (SesNotificationType::Received, _) => match message.content.as_deref() {
                Some(content) => MailSource::Inline(content),
                None => MailSource::None,
            },
            (SesNotificationType::Other, _) => MailSource::None,
        }
    }

    /// Resolve the raw mail to ingest.
    ///
    /// `Ok(None)` means the notification carries no mail. The first call
    /// performs any object store I/O; later calls return the same result.
    pub async fn mail_content(
        &self,
        store: &dyn ObjectStore,
    ) -> Result<Option<&[u8]>, ResolveError> {
        let resolved = self.mail.get_or_init(|| self.resolve(store)).await;

        match resolved {
            Ok(mail) => Ok(mail.as_deref()),
            Err(e) => Err(e.clone()),
        }
    }

    async fn resolve(&self, store: &dyn ObjectStore) -> Result<Option<Vec<u8>>, ResolveError> {
        let content = match self.mail_source() {
            MailSource::None => {
                info!(
                    message_id = %self.envelope.message_id,
                    kind = self.envelope.kind.as_str(),
                    "sns_notification_without_mail"
                );
                return Ok(None);
            }
            MailSource::Inline(content) => content.as_bytes().to_vec(),
            MailSource::Stored(location) => {
                fetch_stored(store, &location, self.receipt_key_id()).await?
            }
        };

        if content.is_empty() {
            warn!(message_id = %self.envelope.message_id, "sns_mail_content_empty");
            return Ok(None);
        }

        Ok(Some(with_original_to(self.destination(), content)))
    }

    /// KMS key SES reported for the S3 action, if any.
    fn receipt_key_id(&self) -> Option<&str> {
        match self.message()?.action()? {
            ReceiptAction::S3(action) => action.kms_key_arn.as_deref(),
            ReceiptAction::Other => None,
        }
    }
}

/// Fetch mail from the object store, decrypting it when needed, then
/// delete the source object.
///
/// When the receipt names a KMS key, the object must have been encrypted
/// with that key.
async fn fetch_stored(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    receipt_key_id: Option<&str>,
) -> Result<Vec<u8>, ResolveError> {
    let object = store.get(location).await.map_err(|e| {
        error!(location = %location, error = %e, "s3_mail_fetch_failed");
        e
    })?;

    let descriptor = EncryptionDescriptor::from_metadata(&object.metadata).map_err(|e| {
        error!(location = %location, error = %e, "s3_mail_encryption_metadata_invalid");
        StoreError::Decrypt {
            location: location.clone(),
            reason: e.to_string(),
        }
    })?;

    if let (Some(descriptor), Some(expected)) = (&descriptor, receipt_key_id) {
        if descriptor.key_id != expected {
            error!(
                location = %location,
                object_key_id = %descriptor.key_id,
                receipt_key_id = %expected,
                "s3_mail_key_mismatch"
            );
            return Err(StoreError::Decrypt {
                location: location.clone(),
                reason: format!(
                    "object encrypted with {} but receipt names {}",
                    descriptor.key_id, expected
                ),
            }
            .into());
        }
    }

    let body = match descriptor {
        Some(descriptor) => store
            .get_decrypted(location, &descriptor.key_id)
            .await
            .map_err(|e| {
                error!(location = %location, error = %e, "s3_mail_decrypt_failed");
                e
            })?,
        None => object.body,
    };

    if let Err(e) = store.delete(location).await {
        warn!(location = %location, error = %e, "s3_mail_delete_failed");
    }

    Ok(body)
}

/// Prepend `X-Original-To` when SES reported a destination.
fn with_original_to(destination: Option<&str>, content: Vec<u8>) -> Vec<u8> {
    match destination {
        Some(address) => {
            let mut mail = format!("X-Original-To: {}\n", address).into_bytes();
            mail.extend_from_slice(&content);
            mail
        }
        None => content,
    }
}

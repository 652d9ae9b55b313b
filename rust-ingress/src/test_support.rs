//! Test doubles and envelope fixtures.
//!
//! Used by the crate's own tests and, with the `test-util` feature, by
//! applications that want to drive the webhook without SNS, AWS or
//! RabbitMQ: pair [`StaticVerifier`] with [`MockObjectStore`] and
//! [`RecordingPipeline`] and post the envelopes built here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};

use crate::pipeline::{message_id_for, MailPipeline};
use crate::sns::{Envelope, NotificationVerifier, SignatureError};
use crate::storage::encryption::{CEK_ALG, IV, KEY_V2, MATDESC, WRAP_ALG};
use crate::storage::{ObjectLocation, ObjectStore, StoreError, StoredObject};

/// Topic ARN every fixture envelope is published on.
pub const DEFAULT_TOPIC: &str = "topic:arn:default";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Envelopes
// =============================================================================

fn received_notification(mail: Value, destination: Option<&str>, extra: Value) -> Value {
    let mut message = json!({
        "notificationType": "Received",
        "mail": {"messageId": "ses-message-id"},
        "receipt": {"action": {"type": "SNS"}},
    });

    if let Some(address) = destination {
        message["mail"]["destination"] = json!([address]);
    }
    if let (Some(target), Some(fields)) = (message.as_object_mut(), mail.as_object()) {
        for (name, value) in fields {
            target.insert(name.clone(), value.clone());
        }
    }
    if let (Some(target), Some(fields)) = (message.as_object_mut(), extra.as_object()) {
        for (name, value) in fields {
            target.insert(name.clone(), value.clone());
        }
    }

    json!({
        "Type": "Notification",
        "MessageId": "sns-message-id",
        "TopicArn": DEFAULT_TOPIC,
        "Timestamp": "2024-01-01T00:00:00.000Z",
        "Message": message.to_string(),
        "SignatureVersion": "1",
        "Signature": "c2lnbmF0dXJl",
        "SigningCertURL": "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-test.pem",
    })
}

/// SES notification with the raw mail inline.
pub fn inline_mail_envelope(content: &str, destination: Option<&str>) -> Value {
    received_notification(json!({"content": content}), destination, json!({}))
}

/// SES notification whose mail was written to S3.
pub fn s3_mail_envelope(
    bucket: &str,
    prefix: &str,
    key: &str,
    destination: Option<&str>,
) -> Value {
    received_notification(
        json!({}),
        destination,
        json!({
            "receipt": {
                "action": {
                    "type": "S3",
                    "topicArn": DEFAULT_TOPIC,
                    "bucketName": bucket,
                    "objectKeyPrefix": prefix,
                    "objectKey": key,
                }
            }
        }),
    )
}

/// Add the KMS key SES reports on an S3 receipt action.
pub fn with_kms_key(mut envelope: Value, key_arn: &str) -> Value {
    let mut message: Value = envelope["Message"]
        .as_str()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    message["receipt"]["action"]["kmsKeyArn"] = json!(key_arn);
    envelope["Message"] = json!(message.to_string());
    envelope
}

/// Subscription handshake pointing at `subscribe_url`.
pub fn subscription_envelope(subscribe_url: &str) -> Value {
    json!({
        "Type": "SubscriptionConfirmation",
        "MessageId": "sns-message-id",
        "Token": "token",
        "TopicArn": DEFAULT_TOPIC,
        "Timestamp": "2024-01-01T00:00:00.000Z",
        "Message": "You have chosen to subscribe to the topic",
        "SubscribeURL": subscribe_url,
        "SignatureVersion": "1",
        "Signature": "c2lnbmF0dXJl",
        "SigningCertURL": "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-test.pem",
    })
}

// =============================================================================
// Verifier
// =============================================================================

/// Verifier with a fixed answer.
pub struct StaticVerifier {
    authentic: bool,
    calls: AtomicUsize,
}

impl StaticVerifier {
    pub fn new(authentic: bool) -> Self {
        Self {
            authentic,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationVerifier for StaticVerifier {
    async fn verify(&self, _envelope: &Envelope) -> Result<(), SignatureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.authentic {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

// =============================================================================
// Object store
// =============================================================================

/// In-memory object store that records every call.
#[derive(Default)]
pub struct MockObjectStore {
    objects: HashMap<ObjectLocation, StoredObject>,
    plaintexts: HashMap<ObjectLocation, Vec<u8>>,
    fail_deletes: bool,
    fetched: Mutex<Vec<ObjectLocation>>,
    decrypted: Mutex<Vec<(ObjectLocation, String)>>,
    deleted: Mutex<Vec<ObjectLocation>>,
}

impl MockObjectStore {
    pub fn with_object(mut self, location: ObjectLocation, body: Vec<u8>) -> Self {
        self.objects.insert(
            location,
            StoredObject {
                body,
                metadata: HashMap::new(),
            },
        );
        self
    }

    /// Store an object carrying envelope encryption metadata. Decrypting
    /// it yields `plaintext`.
    pub fn with_encrypted_object(
        mut self,
        location: ObjectLocation,
        key_id: &str,
        plaintext: Vec<u8>,
    ) -> Self {
        let metadata = HashMap::from([
            (KEY_V2.to_string(), BASE64.encode(b"wrapped-data-key")),
            (IV.to_string(), BASE64.encode([7u8; 12])),
            (MATDESC.to_string(), json!({"kms_cmk_id": key_id}).to_string()),
            (WRAP_ALG.to_string(), "kms+context".to_string()),
            (CEK_ALG.to_string(), "AES/GCM/NoPadding".to_string()),
        ]);

        self.objects.insert(
            location.clone(),
            StoredObject {
                body: b"ciphertext".to_vec(),
                metadata,
            },
        );
        self.plaintexts.insert(location, plaintext);
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn get_count(&self) -> usize {
        locked(&self.fetched).len()
    }

    pub fn fetched(&self) -> Vec<ObjectLocation> {
        locked(&self.fetched).clone()
    }

    pub fn decrypted(&self) -> Vec<(ObjectLocation, String)> {
        locked(&self.decrypted).clone()
    }

    pub fn deleted(&self) -> Vec<ObjectLocation> {
        locked(&self.deleted).clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get(&self, location: &ObjectLocation) -> Result<StoredObject, StoreError> {
        locked(&self.fetched).push(location.clone());
        self.objects
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::Fetch {
                location: location.clone(),
                reason: "NoSuchKey".to_string(),
            })
    }

    async fn get_decrypted(
        &self,
        location: &ObjectLocation,
        key_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        locked(&self.decrypted).push((location.clone(), key_id.to_string()));
        self.plaintexts
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::Decrypt {
                location: location.clone(),
                reason: "no plaintext registered".to_string(),
            })
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        locked(&self.deleted).push(location.clone());
        if self.fail_deletes {
            return Err(StoreError::Delete {
                location: location.clone(),
                reason: "AccessDenied".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipeline that keeps every ingested email in memory.
#[derive(Default)]
pub struct RecordingPipeline {
    fail: bool,
    ingested: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPipeline {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn ingested(&self) -> Vec<Vec<u8>> {
        locked(&self.ingested).clone()
    }
}

#[async_trait]
impl MailPipeline for RecordingPipeline {
    async fn ingest(&self, raw_email: &[u8]) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("broker unavailable");
        }
        locked(&self.ingested).push(raw_email.to_vec());
        Ok(message_id_for(raw_email))
    }
}

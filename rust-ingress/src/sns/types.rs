//! SNS envelope and SES message types.
//!
//! The envelope is the JSON document SNS POSTs to the endpoint. Its
//! `Message` field carries a second JSON document produced by SES when
//! the notification announces received mail.

use serde::{Deserialize, Deserializer};

use crate::storage::ObjectLocation;

// =============================================================================
// SNS Envelope
// =============================================================================

/// Top-level SNS notification envelope.
///
/// Field values are kept exactly as received: the signature covers them
/// verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: EnvelopeType,
    #[serde(rename = "TopicArn")]
    pub topic_arn: String,
    #[serde(rename = "MessageId", default)]
    pub message_id: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: String,
    /// Nested JSON document (SES notification) or handshake text
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    /// Present only on subscription handshakes
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    #[serde(rename = "Token", default)]
    pub token: Option<String>,
    /// Base64 encoded RSA signature
    #[serde(rename = "Signature", default)]
    pub signature: Option<String>,
    #[serde(rename = "SignatureVersion", default)]
    pub signature_version: Option<String>,
    #[serde(rename = "SigningCertURL", default)]
    pub signing_cert_url: Option<String>,
}

/// SNS message type.
///
/// Unknown values are preserved so the signature can still be checked
/// over the original text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EnvelopeType {
    Notification,
    SubscriptionConfirmation,
    UnsubscribeConfirmation,
    Other(String),
}

impl EnvelopeType {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeType::Notification => "Notification",
            EnvelopeType::SubscriptionConfirmation => "SubscriptionConfirmation",
            EnvelopeType::UnsubscribeConfirmation => "UnsubscribeConfirmation",
            EnvelopeType::Other(other) => other,
        }
    }
}

impl From<String> for EnvelopeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Notification" => EnvelopeType::Notification,
            "SubscriptionConfirmation" => EnvelopeType::SubscriptionConfirmation,
            "UnsubscribeConfirmation" => EnvelopeType::UnsubscribeConfirmation,
            _ => EnvelopeType::Other(value),
        }
    }
}

// =============================================================================
// SES Message (nested in Envelope::message)
// =============================================================================

/// SES receipt notification carried in the envelope's `Message` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesMessage {
    pub notification_type: SesNotificationType,
    /// Raw RFC 5322 content, present when SES delivered the mail inline
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mail: Option<MailMetadata>,
    #[serde(default)]
    pub receipt: Option<Receipt>,
}

impl SesMessage {
    /// First recipient address SES delivered to.
    pub fn destination(&self) -> Option<&str> {
        self.mail
            .as_ref()
            .and_then(|mail| mail.destination.first())
            .map(String::as_str)
    }

    pub fn action(&self) -> Option<&ReceiptAction> {
        self.receipt.as_ref().and_then(|receipt| receipt.action.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SesNotificationType {
    Received,
    #[serde(other)]
    Other,
}

/// Delivery metadata of the received mail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMetadata {
    /// Recipients; a bare string is accepted as a single recipient
    #[serde(default, deserialize_with = "one_or_many")]
    pub destination: Vec<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub action: Option<ReceiptAction>,
}

/// Receipt rule action that produced the notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ReceiptAction {
    /// Mail content was written to an S3 bucket
    S3(S3Action),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Action {
    pub bucket_name: String,
    #[serde(default)]
    pub object_key_prefix: Option<String>,
    pub object_key: String,
    /// Set when SES encrypted the object with a KMS key
    #[serde(default)]
    pub kms_key_arn: Option<String>,
}

impl S3Action {
    /// Bucket and key of the stored mail.
    ///
    /// A non-empty prefix is joined to the key with a single `/`; the key
    /// itself is used verbatim.
    pub fn location(&self) -> ObjectLocation {
        let prefix = self
            .object_key_prefix
            .as_deref()
            .map(|prefix| prefix.trim_end_matches('/'))
            .unwrap_or_default();

        let key = if prefix.is_empty() {
            self.object_key.clone()
        } else {
            format!("{}/{}", prefix, self.object_key)
        };

        ObjectLocation::new(self.bucket_name.clone(), key)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(address)) => vec![address],
        Some(OneOrMany::Many(addresses)) => addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_notification_deserialization() {
        let json = r#"{
            "Type": "Notification",
            "MessageId": "22b80b92-fdea-4c2c-8f9d-bdfb0c7bf324",
            "TopicArn": "arn:aws:sns:eu-west-1:111111111111:inbound",
            "Subject": null,
            "Message": "{\"notificationType\":\"Received\"}",
            "Timestamp": "2024-01-01T00:00:00.000Z",
            "SignatureVersion": "1",
            "Signature": "c2ln",
            "SigningCertURL": "https://sns.eu-west-1.amazonaws.com/SimpleNotificationService-abc.pem",
            "UnsubscribeURL": "https://sns.eu-west-1.amazonaws.com/?Action=Unsubscribe"
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.kind, EnvelopeType::Notification);
        assert_eq!(envelope.topic_arn, "arn:aws:sns:eu-west-1:111111111111:inbound");
        assert!(envelope.subject.is_none());
        assert!(envelope.subscribe_url.is_none());
        assert_eq!(envelope.signature_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_envelope_requires_type_and_topic() {
        assert!(serde_json::from_str::<Envelope>(r#"{"TopicArn": "t"}"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"Type": "Notification"}"#).is_err());
    }

    #[test]
    fn test_envelope_type_preserves_unknown() {
        let kind = EnvelopeType::from("Subscription".to_string());
        assert_eq!(kind, EnvelopeType::Other("Subscription".to_string()));
        assert_eq!(kind.as_str(), "Subscription");
        assert_eq!(
            EnvelopeType::from("SubscriptionConfirmation".to_string()).as_str(),
            "SubscriptionConfirmation"
        );
    }

    #[test]
    fn test_ses_message_s3_action() {
        let json = r#"{
            "notificationType": "Received",
            "mail": {"destination": ["user@example.com", "other@example.com"]},
            "receipt": {
                "action": {
                    "type": "S3",
                    "topicArn": "arn:aws:sns:us-east-1:123456789012:inbound",
                    "bucketName": "inbound-mail",
                    "objectKeyPrefix": "incoming",
                    "objectKey": "o3vrnil0e2ic28trm7dfhrc2v0clambfm"
                }
            }
        }"#;

        let message: SesMessage = serde_json::from_str(json).unwrap();

        assert_eq!(message.notification_type, SesNotificationType::Received);
        assert_eq!(message.destination(), Some("user@example.com"));
        match message.action() {
            Some(ReceiptAction::S3(action)) => {
                assert_eq!(action.bucket_name, "inbound-mail");
                assert_eq!(
                    action.location().key,
                    "incoming/o3vrnil0e2ic28trm7dfhrc2v0clambfm"
                );
            }
            other => panic!("Expected S3 action, got {:?}", other),
        }
    }

    #[test]
    fn test_ses_message_unknown_action_and_type() {
        let json = r#"{
            "notificationType": "Bounce",
            "receipt": {"action": {"type": "SNS", "topicArn": "arn"}}
        }"#;

        let message: SesMessage = serde_json::from_str(json).unwrap();

        assert_eq!(message.notification_type, SesNotificationType::Other);
        assert_eq!(message.action(), Some(&ReceiptAction::Other));
        assert!(message.destination().is_none());
    }

    #[test]
    fn test_destination_accepts_single_string() {
        let json = r#"{"notificationType": "Received", "mail": {"destination": "user@example.com"}}"#;

        let message: SesMessage = serde_json::from_str(json).unwrap();

        assert_eq!(message.destination(), Some("user@example.com"));
    }

    #[test]
    fn test_location_omits_empty_prefix() {
        let action = S3Action {
            bucket_name: "bucket".to_string(),
            object_key_prefix: Some(String::new()),
            object_key: "key".to_string(),
            kms_key_arn: None,
        };
        assert_eq!(action.location(), ObjectLocation::new("bucket", "key"));

        let action = S3Action {
            object_key_prefix: None,
            ..action
        };
        assert_eq!(action.location().key, "key");
    }

    #[test]
    fn test_location_keeps_key_verbatim() {
        let action = S3Action {
            bucket_name: "bucket".to_string(),
            object_key_prefix: None,
            object_key: "/abs/key".to_string(),
            kms_key_arn: None,
        };
        assert_eq!(action.location(), ObjectLocation::new("bucket", "/abs/key"));

        let action = S3Action {
            object_key_prefix: Some("incoming/".to_string()),
            object_key: "abc123".to_string(),
            ..action
        };
        assert_eq!(action.location().key, "incoming/abc123");

        let action = S3Action {
            object_key_prefix: Some("/".to_string()),
            ..action
        };
        assert_eq!(action.location().key, "abc123");
    }
}

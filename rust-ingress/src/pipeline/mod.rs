//! Hand-off of resolved mail to the mail-processing pipeline.
//!
//! ## Architecture
//!
//! ```text
//! SNS → Web Server → inbound_emails queue → mail pipeline
//! ```

pub mod email_parser;
pub mod publisher;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

pub use email_parser::{message_id_for, parse_raw_email, ParsedEmail};
pub use publisher::Publisher;

/// Queue name for resolved inbound emails.
pub const INBOUND_EMAIL_QUEUE: &str = "inbound_emails";

/// Consumer of resolved raw mail.
#[async_trait]
pub trait MailPipeline: Send + Sync {
    /// Record an inbound email and return its identifier.
    async fn ingest(&self, raw_email: &[u8]) -> anyhow::Result<String>;
}

/// Message published to the inbound_emails queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Message-Id of the email (or content hash when missing)
    pub message_id: String,
    /// Recipient SES delivered to, from the X-Original-To header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Base64 encoded raw RFC 5322 content
    pub raw_email: String,
}

impl InboundEmail {
    /// Build the queue message for raw mail.
    pub fn from_raw(raw_email: &[u8]) -> Self {
        let parsed = email_parser::parse_or_default(raw_email);

        InboundEmail {
            message_id: parsed
                .message_id
                .unwrap_or_else(|| email_parser::generated_message_id(raw_email)),
            original_to: parsed.original_to,
            subject: parsed.subject,
            raw_email: BASE64.encode(raw_email),
        }
    }
}

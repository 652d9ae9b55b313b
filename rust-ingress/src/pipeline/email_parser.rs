//! RFC 5322 header extraction using mailparse.
//!
//! The mail pipeline identifies every inbound email by its Message-Id.
//! Mail without one gets a deterministic SHA-256 identifier instead.

use anyhow::{Context, Result};
use mailparse::{parse_headers, MailHeaderMap};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Headers the pipeline records for an inbound email.
#[derive(Debug, Default)]
pub struct ParsedEmail {
    /// Message-Id header value (without angle brackets)
    pub message_id: Option<String>,
    /// Subject header value
    pub subject: Option<String>,
    /// X-Original-To header value
    pub original_to: Option<String>,
}

/// Parse the header block of raw RFC 5322 content.
pub fn parse_raw_email(raw_email: &[u8]) -> Result<ParsedEmail> {
    let (headers, _) = parse_headers(raw_email).context("Failed to parse email headers")?;

    let message_id = headers
        .get_first_value("Message-Id")
        .map(|id| id.trim().trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|id| !id.is_empty());

    Ok(ParsedEmail {
        message_id,
        subject: headers.get_first_value("Subject"),
        original_to: headers.get_first_value("X-Original-To"),
    })
}

/// Parse headers, logging and falling back to no headers on failure.
pub fn parse_or_default(raw_email: &[u8]) -> ParsedEmail {
    match parse_raw_email(raw_email) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "email_header_parse_failed");
            ParsedEmail::default()
        }
    }
}

/// Deterministic identifier for mail without a Message-Id.
pub fn generated_message_id(raw_email: &[u8]) -> String {
    let generated = hex::encode(Sha256::digest(raw_email));
    info!(generated_id = %generated, "email_message_id_fallback");
    generated
}

/// Message-Id of the email, or a SHA-256 of its content when absent.
pub fn message_id_for(raw_email: &[u8]) -> String {
    parse_or_default(raw_email)
        .message_id
        .unwrap_or_else(|| generated_message_id(raw_email))
}

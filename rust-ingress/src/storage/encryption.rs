//! S3 client-side envelope encryption as used by SES.
//!
//! SES encrypts the mail body with a random AES-256 data key
//! (`AES/GCM/NoPadding`) and stores the data key wrapped by KMS in the
//! object metadata:
//!
//! - `x-amz-key-v2`: base64 KMS ciphertext of the data key
//! - `x-amz-iv`: base64 GCM nonce
//! - `x-amz-matdesc`: JSON material description, holds `kms_cmk_id`
//! - `x-amz-wrap-alg`: `kms+context` (or legacy `kms`)
//! - `x-amz-cek-alg`: content encryption algorithm
//! - `x-amz-tag-len`: GCM tag length in bits
//!
//! Reference: https://docs.aws.amazon.com/ses/latest/dg/receiving-email-action-s3.html

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

pub const KEY_V2: &str = "x-amz-key-v2";
pub const IV: &str = "x-amz-iv";
pub const MATDESC: &str = "x-amz-matdesc";
pub const WRAP_ALG: &str = "x-amz-wrap-alg";
pub const CEK_ALG: &str = "x-amz-cek-alg";
pub const TAG_LEN: &str = "x-amz-tag-len";

const CEK_ALG_AES_GCM: &str = "AES/GCM/NoPadding";
const CEK_ALG_CONTEXT_KEY: &str = "aws:x-amz-cek-alg";
const KMS_KEY_ID: &str = "kms_cmk_id";
const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_BITS: &str = "128";

/// Errors decoding the encryption metadata or the content.
#[derive(Debug, Clone, Error)]
pub enum EncryptionError {
    #[error("missing encryption metadata: {0}")]
    MissingField(&'static str),

    #[error("invalid base64 in {field}: {reason}")]
    InvalidBase64 { field: &'static str, reason: String },

    #[error("invalid material description: {0}")]
    InvalidMaterialDescription(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid data key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("invalid nonce length: {0} bytes")]
    InvalidNonceLength(usize),

    #[error("content authentication failed")]
    Authentication,
}

/// How the data key was wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapAlgorithm {
    /// KMS with the material description as encryption context
    KmsContext,
    /// Legacy KMS wrapping
    Kms,
}

/// Encryption parameters read from object metadata.
#[derive(Debug, Clone)]
pub struct EncryptionDescriptor {
    pub key_id: String,
    pub wrap_algorithm: WrapAlgorithm,
    pub wrapped_key: Vec<u8>,
    pub iv: Vec<u8>,
    /// Encryption context KMS must be called with
    pub encryption_context: HashMap<String, String>,
}

impl EncryptionDescriptor {
    /// Whether the metadata marks the object as client-side encrypted.
    pub fn is_present(metadata: &HashMap<String, String>) -> bool {
        lookup(metadata, KEY_V2).is_some() || lookup(metadata, MATDESC).is_some()
    }

    /// Read the descriptor from object metadata.
    ///
    /// Returns `Ok(None)` for plaintext objects.
    pub fn from_metadata(
        metadata: &HashMap<String, String>,
    ) -> Result<Option<Self>, EncryptionError> {
        if !Self::is_present(metadata) {
            return Ok(None);
        }

        let matdesc = lookup(metadata, MATDESC).ok_or(EncryptionError::MissingField(MATDESC))?;
        let mut encryption_context: HashMap<String, String> = serde_json::from_str(matdesc)
            .map_err(|e| EncryptionError::InvalidMaterialDescription(e.to_string()))?;

        let key_id = encryption_context
            .get(KMS_KEY_ID)
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or(EncryptionError::MissingField(KMS_KEY_ID))?;

        let cek_alg = lookup(metadata, CEK_ALG).unwrap_or(CEK_ALG_AES_GCM);
        if cek_alg != CEK_ALG_AES_GCM {
            return Err(EncryptionError::UnsupportedAlgorithm(cek_alg.to_string()));
        }

        if let Some(tag_len) = lookup(metadata, TAG_LEN) {
            if tag_len != GCM_TAG_BITS {
                return Err(EncryptionError::UnsupportedAlgorithm(format!(
                    "tag length {}",
                    tag_len
                )));
            }
        }

        let wrap_algorithm = match lookup(metadata, WRAP_ALG) {
            Some("kms+context") => WrapAlgorithm::KmsContext,
            Some("kms") => WrapAlgorithm::Kms,
            Some(other) => return Err(EncryptionError::UnsupportedAlgorithm(other.to_string())),
            None => return Err(EncryptionError::MissingField(WRAP_ALG)),
        };

        if wrap_algorithm == WrapAlgorithm::KmsContext {
            encryption_context
                .entry(CEK_ALG_CONTEXT_KEY.to_string())
                .or_insert_with(|| cek_alg.to_string());
        }

        let wrapped_key = decode_field(metadata, KEY_V2)?;
        let iv = decode_field(metadata, IV)?;

        Ok(Some(Self {
            key_id,
            wrap_algorithm,
            wrapped_key,
            iv,
            encryption_context,
        }))
    }
}

/// Decrypt an `AES/GCM/NoPadding` body (ciphertext followed by the tag).
pub fn decrypt_content(
    data_key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if iv.len() != GCM_NONCE_LEN {
        return Err(EncryptionError::InvalidNonceLength(iv.len()));
    }

    let cipher = Aes256Gcm::new_from_slice(data_key)
        .map_err(|_| EncryptionError::InvalidKeyLength(data_key.len()))?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| EncryptionError::Authentication)
}

/// Metadata may come with or without the user-metadata header prefix.
fn lookup<'a>(metadata: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .or_else(|| metadata.get(&format!("x-amz-meta-{}", name)))
        .map(String::as_str)
}

fn decode_field(
    metadata: &HashMap<String, String>,
    field: &'static str,
) -> Result<Vec<u8>, EncryptionError> {
    let value = lookup(metadata, field).ok_or(EncryptionError::MissingField(field))?;
    BASE64
        .decode(value.trim())
        .map_err(|e| EncryptionError::InvalidBase64 {
            field,
            reason: e.to_string(),
        })
}

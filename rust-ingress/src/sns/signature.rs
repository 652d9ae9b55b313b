//! SNS message signature verification.
//!
//! SNS signs a canonical string built from selected envelope fields with
//! the private key of a certificate it publishes over HTTPS.
//! Reference: https://docs.aws.amazon.com/sns/latest/dg/sns-verify-signature-of-message.html
//!
//! - `SignatureVersion` "1": SHA1withRSA
//! - `SignatureVersion` "2": SHA256withRSA
//! - `SigningCertURL` must be an `https` URL on `sns.<region>.amazonaws.com`

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::sns::types::{Envelope, EnvelopeType};

/// Reasons an envelope is not considered authentic.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unsupported signature version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("untrusted signing certificate URL: {0}")]
    UntrustedCertificateUrl(String),

    #[error("failed to fetch signing certificate: {0}")]
    CertificateFetch(String),

    #[error("invalid signing certificate: {0}")]
    InvalidCertificate(String),

    #[error("signing certificate is not valid at this time")]
    CertificateExpired,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature does not match")]
    Mismatch,
}

/// Authenticity check for inbound envelopes.
#[async_trait]
pub trait NotificationVerifier: Send + Sync {
    /// `Ok(())` only when the envelope is provably signed by SNS.
    async fn verify(&self, envelope: &Envelope) -> Result<(), SignatureError>;
}

/// Signature algorithm selected by `SignatureVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    Sha1,
    Sha256,
}

impl SignatureVersion {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, SignatureError> {
        match envelope.signature_version.as_deref() {
            Some("1") => Ok(SignatureVersion::Sha1),
            Some("2") => Ok(SignatureVersion::Sha256),
            Some(other) => Err(SignatureError::UnsupportedVersion(other.to_string())),
            None => Err(SignatureError::MissingField("SignatureVersion")),
        }
    }
}

/// Verifies envelopes against the certificate SNS publishes.
#[derive(Clone)]
pub struct SnsMessageVerifier {
    http: reqwest::Client,
}

impl SnsMessageVerifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn fetch_certificate(&self, url: Url) -> Result<String, SignatureError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SignatureError::CertificateFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignatureError::CertificateFetch(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let pem = response
            .text()
            .await
            .map_err(|e| SignatureError::CertificateFetch(e.to_string()))?;

        info!(url = %url, pem_length = pem.len(), "sns_certificate_fetched");

        Ok(pem)
    }
}

#[async_trait]
impl NotificationVerifier for SnsMessageVerifier {
    async fn verify(&self, envelope: &Envelope) -> Result<(), SignatureError> {
        // Everything that needs no network is checked before the fetch.
        let version = SignatureVersion::from_envelope(envelope)?;
        canonical_string(envelope)?;

        let cert_url = envelope
            .signing_cert_url
            .as_deref()
            .ok_or(SignatureError::MissingField("SigningCertURL"))?;
        let cert_url = validate_certificate_url(cert_url)?;

        let pem = self.fetch_certificate(cert_url).await?;
        let key = public_key_from_pem(&pem, SystemTime::now())?;

        verify_with_key(&key, version, envelope)
    }
}

/// Build the string SNS signed for this envelope.
pub fn canonical_string(envelope: &Envelope) -> Result<String, SignatureError> {
    let mut fields: Vec<(&str, &str)> = vec![
        ("Message", envelope.message.as_str()),
        ("MessageId", envelope.message_id.as_str()),
    ];

    match &envelope.kind {
        EnvelopeType::Notification => {
            if let Some(subject) = envelope.subject.as_deref() {
                fields.push(("Subject", subject));
            }
            fields.push(("Timestamp", envelope.timestamp.as_str()));
        }
        EnvelopeType::SubscriptionConfirmation | EnvelopeType::UnsubscribeConfirmation => {
            let subscribe_url = envelope
                .subscribe_url
                .as_deref()
                .ok_or(SignatureError::MissingField("SubscribeURL"))?;
            let token = envelope
                .token
                .as_deref()
                .ok_or(SignatureError::MissingField("Token"))?;
            fields.push(("SubscribeURL", subscribe_url));
            fields.push(("Timestamp", envelope.timestamp.as_str()));
            fields.push(("Token", token));
        }
        EnvelopeType::Other(other) => {
            return Err(SignatureError::UnsupportedType(other.clone()));
        }
    }

    fields.push(("TopicArn", envelope.topic_arn.as_str()));
    fields.push(("Type", envelope.kind.as_str()));

    Ok(fields
        .into_iter()
        .map(|(name, value)| format!("{}\n{}\n", name, value))
        .collect())
}

/// Accept only `https://sns.<region>.amazonaws.com[.cn]/....pem`.
pub fn validate_certificate_url(raw: &str) -> Result<Url, SignatureError> {
    let untrusted = || SignatureError::UntrustedCertificateUrl(raw.to_string());

    let url = Url::parse(raw).map_err(|_| untrusted())?;

    if url.scheme() != "https" || !url.path().ends_with(".pem") {
        return Err(untrusted());
    }

    let host = url.host_str().ok_or_else(untrusted)?;
    let region = host
        .strip_suffix(".amazonaws.com")
        .or_else(|| host.strip_suffix(".amazonaws.com.cn"))
        .and_then(|rest| rest.strip_prefix("sns."))
        .ok_or_else(untrusted)?;

    let region_valid = region.len() >= 3
        && region
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');

    if !region_valid {
        return Err(untrusted());
    }

    Ok(url)
}

/// Extract the RSA key from a PEM certificate valid at `now`.
pub fn public_key_from_pem(pem: &str, now: SystemTime) -> Result<RsaPublicKey, SignatureError> {
    let certificate = Certificate::from_pem(pem.trim().as_bytes())
        .map_err(|e| SignatureError::InvalidCertificate(e.to_string()))?;

    let validity = &certificate.tbs_certificate.validity;
    if now < validity.not_before.to_system_time() || now > validity.not_after.to_system_time() {
        warn!(
            not_before = ?validity.not_before,
            not_after = ?validity.not_after,
            "sns_certificate_outside_validity"
        );
        return Err(SignatureError::CertificateExpired);
    }

    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SignatureError::InvalidCertificate(e.to_string()))?;

    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| SignatureError::InvalidCertificate(e.to_string()))
}

/// Check the envelope signature against a known public key.
pub fn verify_with_key(
    key: &RsaPublicKey,
    version: SignatureVersion,
    envelope: &Envelope,
) -> Result<(), SignatureError> {
    let signed = canonical_string(envelope)?;

    let encoded = envelope
        .signature
        .as_deref()
        .ok_or(SignatureError::MissingField("Signature"))?;
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;

    let result = match version {
        SignatureVersion::Sha1 => {
            VerifyingKey::<Sha1>::new(key.clone()).verify(signed.as_bytes(), &signature)
        }
        SignatureVersion::Sha256 => {
            VerifyingKey::<Sha256>::new(key.clone()).verify(signed.as_bytes(), &signature)
        }
    };

    result.map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;
    use serde_json::json;

    // Self-signed, valid from 2020-01-01T00:00:00Z to 2100-01-01T00:00:00Z
    const SIGNING_CERT_PEM: &str = include_str!("../../tests/fixtures/sns_signing_cert.pem");
    const SIGNING_KEY_PEM: &str = include_str!("../../tests/fixtures/sns_signing_key.pem");
    const NOT_BEFORE_SECS: u64 = 1_577_836_800;
    const NOT_AFTER_SECS: u64 = 4_102_444_800;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    fn notification_envelope() -> Envelope {
        envelope(json!({
            "Type": "Notification",
            "MessageId": "22b80b92-fdea-4c2c-8f9d-bdfb0c7bf324",
            "TopicArn": "arn:aws:sns:us-west-2:123456789012:MyTopic",
            "Subject": "My First Message",
            "Message": "Hello world!",
            "Timestamp": "2012-05-02T00:54:06.655Z",
            "SignatureVersion": "1",
            "SigningCertURL": "https://sns.us-west-2.amazonaws.com/SimpleNotificationService-f3ecfb7224c7233fe7bb5f59f96de52f.pem"
        }))
    }

    fn private_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    fn sign(key: &RsaPrivateKey, version: SignatureVersion, envelope: &mut Envelope) {
        let signed = canonical_string(envelope).unwrap();
        let signature = match version {
            SignatureVersion::Sha1 => SigningKey::<Sha1>::new(key.clone())
                .sign(signed.as_bytes())
                .to_vec(),
            SignatureVersion::Sha256 => SigningKey::<Sha256>::new(key.clone())
                .sign(signed.as_bytes())
                .to_vec(),
        };
        envelope.signature = Some(BASE64.encode(signature));
    }

    #[test]
    fn test_canonical_string_notification() {
        let canonical = canonical_string(&notification_envelope()).unwrap();

        assert_eq!(
            canonical,
            "Message\nHello world!\n\
             MessageId\n22b80b92-fdea-4c2c-8f9d-bdfb0c7bf324\n\
             Subject\nMy First Message\n\
             Timestamp\n2012-05-02T00:54:06.655Z\n\
             TopicArn\narn:aws:sns:us-west-2:123456789012:MyTopic\n\
             Type\nNotification\n"
        );
    }

    #[test]
    fn test_canonical_string_notification_without_subject() {
        let mut envelope = notification_envelope();
        envelope.subject = None;

        let canonical = canonical_string(&envelope).unwrap();

        assert!(!canonical.contains("Subject"));
        assert!(canonical.starts_with("Message\nHello world!\nMessageId\n"));
    }

    #[test]
    fn test_canonical_string_subscription_confirmation() {
        let envelope = envelope(json!({
            "Type": "SubscriptionConfirmation",
            "MessageId": "165545c9-2a5c-472c-8df2-7ff2be2b3b1b",
            "Token": "2336412f37",
            "TopicArn": "arn:aws:sns:us-west-2:123456789012:MyTopic",
            "Message": "You have chosen to subscribe to the topic",
            "SubscribeURL": "https://sns.us-west-2.amazonaws.com/?Action=ConfirmSubscription",
            "Timestamp": "2012-04-26T20:45:04.751Z"
        }));

        let canonical = canonical_string(&envelope).unwrap();

        assert_eq!(
            canonical,
            "Message\nYou have chosen to subscribe to the topic\n\
             MessageId\n165545c9-2a5c-472c-8df2-7ff2be2b3b1b\n\
             SubscribeURL\nhttps://sns.us-west-2.amazonaws.com/?Action=ConfirmSubscription\n\
             Timestamp\n2012-04-26T20:45:04.751Z\n\
             Token\n2336412f37\n\
             TopicArn\narn:aws:sns:us-west-2:123456789012:MyTopic\n\
             Type\nSubscriptionConfirmation\n"
        );
    }

    #[test]
    fn test_canonical_string_subscription_requires_token() {
        let envelope = envelope(json!({
            "Type": "SubscriptionConfirmation",
            "TopicArn": "arn",
            "SubscribeURL": "https://example.com"
        }));

        assert!(matches!(
            canonical_string(&envelope),
            Err(SignatureError::MissingField("Token"))
        ));
    }

    #[test]
    fn test_canonical_string_rejects_unknown_type() {
        let envelope = envelope(json!({"Type": "Subscription", "TopicArn": "arn"}));

        assert!(matches!(
            canonical_string(&envelope),
            Err(SignatureError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_signature_version() {
        let mut envelope = notification_envelope();
        assert_eq!(
            SignatureVersion::from_envelope(&envelope).unwrap(),
            SignatureVersion::Sha1
        );

        envelope.signature_version = Some("2".to_string());
        assert_eq!(
            SignatureVersion::from_envelope(&envelope).unwrap(),
            SignatureVersion::Sha256
        );

        envelope.signature_version = Some("3".to_string());
        assert!(SignatureVersion::from_envelope(&envelope).is_err());

        envelope.signature_version = None;
        assert!(SignatureVersion::from_envelope(&envelope).is_err());
    }

    #[test]
    fn test_validate_certificate_url() {
        assert!(validate_certificate_url(
            "https://sns.eu-west-1.amazonaws.com/SimpleNotificationService-a86cb10b4e1f29c941702d737128f7b6.pem"
        )
        .is_ok());
        assert!(validate_certificate_url(
            "https://sns.cn-north-1.amazonaws.com.cn/SimpleNotificationService-abc.pem"
        )
        .is_ok());

        // Wrong scheme, host, or file type
        for url in [
            "http://sns.eu-west-1.amazonaws.com/cert.pem",
            "https://sns.eu-west-1.amazonaws.com.evil.com/cert.pem",
            "https://evil.com/sns.eu-west-1.amazonaws.com/cert.pem",
            "https://s3.eu-west-1.amazonaws.com/cert.pem",
            "https://sns.eu-west-1.amazonaws.com/cert.txt",
            "https://sns.x.amazonaws.com/cert.pem",
            "not a url",
        ] {
            assert!(validate_certificate_url(url).is_err(), "{} accepted", url);
        }
    }

    #[test]
    fn test_public_key_from_invalid_pem() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----";

        let result = public_key_from_pem(pem, SystemTime::now());

        assert!(matches!(result, Err(SignatureError::InvalidCertificate(_))));
    }

    #[test]
    fn test_public_key_from_certificate_verifies_signature() {
        let signing_key = RsaPrivateKey::from_pkcs8_pem(SIGNING_KEY_PEM).unwrap();

        let key = public_key_from_pem(SIGNING_CERT_PEM, at(NOT_BEFORE_SECS + 86_400)).unwrap();
        assert_eq!(key, signing_key.to_public_key());

        let mut envelope = notification_envelope();
        sign(&signing_key, SignatureVersion::Sha1, &mut envelope);
        assert!(verify_with_key(&key, SignatureVersion::Sha1, &envelope).is_ok());

        envelope.signature_version = Some("2".to_string());
        sign(&signing_key, SignatureVersion::Sha256, &mut envelope);
        assert!(verify_with_key(&key, SignatureVersion::Sha256, &envelope).is_ok());
    }

    #[test]
    fn test_certificate_accepted_at_validity_bounds() {
        assert!(public_key_from_pem(SIGNING_CERT_PEM, at(NOT_BEFORE_SECS)).is_ok());
        assert!(public_key_from_pem(SIGNING_CERT_PEM, at(NOT_AFTER_SECS)).is_ok());
    }

    #[test]
    fn test_certificate_expired_after_not_after() {
        let result = public_key_from_pem(SIGNING_CERT_PEM, at(NOT_AFTER_SECS + 1));

        assert!(matches!(result, Err(SignatureError::CertificateExpired)));
    }

    #[test]
    fn test_certificate_not_yet_valid_before_not_before() {
        let result = public_key_from_pem(SIGNING_CERT_PEM, at(NOT_BEFORE_SECS - 1));

        assert!(matches!(result, Err(SignatureError::CertificateExpired)));
    }

    #[test]
    fn test_verify_with_key_sha1() {
        let key = private_key();
        let mut envelope = notification_envelope();
        sign(&key, SignatureVersion::Sha1, &mut envelope);

        assert!(verify_with_key(&key.to_public_key(), SignatureVersion::Sha1, &envelope).is_ok());
    }

    #[test]
    fn test_verify_with_key_sha256() {
        let key = private_key();
        let mut envelope = notification_envelope();
        envelope.signature_version = Some("2".to_string());
        sign(&key, SignatureVersion::Sha256, &mut envelope);

        assert!(verify_with_key(&key.to_public_key(), SignatureVersion::Sha256, &envelope).is_ok());
        // The algorithm must match the one used to sign
        assert!(matches!(
            verify_with_key(&key.to_public_key(), SignatureVersion::Sha1, &envelope),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn test_verify_with_key_tampered_message() {
        let key = private_key();
        let mut envelope = notification_envelope();
        sign(&key, SignatureVersion::Sha1, &mut envelope);
        envelope.message = "Goodbye world!".to_string();

        assert!(matches!(
            verify_with_key(&key.to_public_key(), SignatureVersion::Sha1, &envelope),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn test_verify_with_key_malformed_signature() {
        let key = private_key();
        let mut envelope = notification_envelope();
        envelope.signature = Some("%%% not base64 %%%".to_string());

        assert!(matches!(
            verify_with_key(&key.to_public_key(), SignatureVersion::Sha1, &envelope),
            Err(SignatureError::MalformedSignature(_))
        ));

        envelope.signature = None;
        assert!(matches!(
            verify_with_key(&key.to_public_key(), SignatureVersion::Sha1, &envelope),
            Err(SignatureError::MissingField("Signature"))
        ));
    }

    #[tokio::test]
    async fn test_verifier_rejects_untrusted_certificate_url_without_fetching() {
        let verifier = SnsMessageVerifier::new(Duration::from_millis(100)).unwrap();
        let mut envelope = notification_envelope();
        envelope.signature = Some(BASE64.encode([0u8; 128]));
        envelope.signing_cert_url = Some("http://127.0.0.1:1/cert.pem".to_string());

        let result = verifier.verify(&envelope).await;

        assert!(matches!(result, Err(SignatureError::UntrustedCertificateUrl(_))));
    }

    #[tokio::test]
    async fn test_verifier_requires_signature_version() {
        let verifier = SnsMessageVerifier::new(Duration::from_millis(100)).unwrap();
        let mut envelope = notification_envelope();
        envelope.signature_version = None;

        let result = verifier.verify(&envelope).await;

        assert!(matches!(result, Err(SignatureError::MissingField("SignatureVersion"))));
    }
}

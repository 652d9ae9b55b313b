//! SNS subscription handshake.
//!
//! SNS asks a new HTTP subscriber to prove it owns the endpoint by
//! fetching the `SubscribeURL` it sends in a `SubscriptionConfirmation`.
//! The GET itself confirms the subscription.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};
use url::Url;

/// Reasons a subscription could not be confirmed.
#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("missing SubscribeURL")]
    MissingUrl,

    #[error("invalid SubscribeURL: {0}")]
    InvalidUrl(String),

    #[error("confirmation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("confirmation rejected with status {0}")]
    Rejected(u16),
}

/// Performs the confirmation GET with a bounded timeout.
#[derive(Clone)]
pub struct SubscriptionConfirmer {
    http: reqwest::Client,
}

impl SubscriptionConfirmer {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Fetch `subscribe_url`; any 2xx status confirms the subscription.
    pub async fn confirm(&self, subscribe_url: Option<&str>) -> Result<(), ConfirmationError> {
        let result = self.request(subscribe_url).await;

        match &result {
            Ok(()) => info!("sns_subscription_confirmed"),
            Err(e) => error!(error = %e, "sns_subscription_confirmation_rejected"),
        }

        result
    }

    async fn request(&self, subscribe_url: Option<&str>) -> Result<(), ConfirmationError> {
        let raw = subscribe_url.ok_or(ConfirmationError::MissingUrl)?;
        let url = Url::parse(raw).map_err(|e| ConfirmationError::InvalidUrl(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfirmationError::InvalidUrl(raw.to_string()));
        }

        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(ConfirmationError::Rejected(status.as_u16()))
        }
    }
}

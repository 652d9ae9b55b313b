//! Error taxonomy of the notification processor.
//!
//! Every failure while handling a request ends up as one of these
//! variants, and each variant maps to exactly one HTTP status.

use axum::http::StatusCode;
use thiserror::Error;

use crate::sns::{ConfirmationError, ParseError, ResolveError, SignatureError};

#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    MalformedBody(#[from] ParseError),

    #[error("notification is not authentic: {0}")]
    Unauthenticated(#[from] SignatureError),

    #[error("untrusted topic: {0}")]
    UntrustedTopic(String),

    #[error("subscription confirmation failed: {0}")]
    SubscriptionRejected(#[from] ConfirmationError),

    #[error("unsupported notification type: {0}")]
    UnsupportedType(String),

    #[error("notification carries no mail content")]
    NoMailContent,

    #[error("mail resolution failed: {0}")]
    Storage(#[from] ResolveError),

    #[error("mail pipeline failed: {0}")]
    Pipeline(#[source] anyhow::Error),
}

impl IngressError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngressError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            IngressError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            IngressError::UntrustedTopic(_) => StatusCode::UNAUTHORIZED,
            IngressError::SubscriptionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IngressError::UnsupportedType(_) => StatusCode::BAD_REQUEST,
            IngressError::NoMailContent => StatusCode::BAD_REQUEST,
            IngressError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngressError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

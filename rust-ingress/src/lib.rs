//! SES Ingress - SNS webhook for inbound email.
//!
//! Amazon SES receives mail and announces it through SNS. This library
//! validates those notifications and forwards the raw mail they carry,
//! either inline or from S3, to the mail pipeline.
//!
//! ## Architecture
//!
//! ```text
//! SES → SNS → Web Server → NotificationProcessor → inbound_emails → mail pipeline
//!                                 │
//!                                 └── S3 / KMS (stored mail)
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod sns;
pub mod storage;
pub mod web;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use error::IngressError;
pub use pipeline::{MailPipeline, Publisher, INBOUND_EMAIL_QUEUE};
pub use processor::{NotificationProcessor, Outcome};
pub use sns::{Notification, SnsMessageVerifier, SubscriptionConfirmer, TrustedTopics};
pub use storage::{ObjectStore, S3ObjectStore};
pub use web::AppState;

//! SNS notification handling.
//!
//! This module provides:
//! - Envelope and SES message types
//! - Request-scoped parsing and mail resolution
//! - Signature verification, topic allow-listing and subscription handshakes
//!
//! ## Flow
//!
//! ```text
//! body → Notification::parse → verify → TrustedTopics → confirm | mail_content
//! ```

pub mod notification;
pub mod signature;
pub mod subscription;
pub mod topics;
pub mod types;

pub use notification::{MailSource, Notification, ParseError, ResolveError};
pub use signature::{NotificationVerifier, SignatureError, SnsMessageVerifier};
pub use subscription::{ConfirmationError, SubscriptionConfirmer};
pub use topics::TrustedTopics;
pub use types::{Envelope, EnvelopeType, ReceiptAction, S3Action, SesMessage, SesNotificationType};

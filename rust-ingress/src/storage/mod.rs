//! Object store access for mail that SES wrote to S3.
//!
//! The resolver only needs three capabilities: fetch an object, fetch and
//! decrypt an object written with client-side encryption, and delete an
//! object. They sit behind [`ObjectStore`] so the resolution logic can be
//! exercised without AWS.

pub mod encryption;
pub mod s3;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use encryption::{EncryptionDescriptor, EncryptionError};
pub use s3::S3ObjectStore;

/// Bucket and key of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Object body with its user metadata (without the `x-amz-meta-` prefix).
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

/// Object store failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("failed to fetch {location}: {reason}")]
    Fetch {
        location: ObjectLocation,
        reason: String,
    },

    #[error("failed to decrypt {location}: {reason}")]
    Decrypt {
        location: ObjectLocation,
        reason: String,
    },

    #[error("failed to delete {location}: {reason}")]
    Delete {
        location: ObjectLocation,
        reason: String,
    },
}

/// Capabilities the mail resolver needs from the external object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object as stored.
    async fn get(&self, location: &ObjectLocation) -> Result<StoredObject, StoreError>;

    /// Fetch an object written with envelope encryption and return the
    /// plaintext body, unwrapping the data key with `key_id`.
    async fn get_decrypted(
        &self,
        location: &ObjectLocation,
        key_id: &str,
    ) -> Result<Vec<u8>, StoreError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError>;
}

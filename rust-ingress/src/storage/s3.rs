//! S3-backed object store with KMS envelope decryption.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{timeout::TimeoutConfig, BehaviorVersion, Region};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_s3::error::DisplayErrorContext;
use tracing::info;

use super::encryption::{decrypt_content, EncryptionDescriptor};
use super::{ObjectLocation, ObjectStore, StoreError, StoredObject};

/// Production [`ObjectStore`] over S3, with KMS for unwrapping data keys.
#[derive(Clone)]
pub struct S3ObjectStore {
    s3: aws_sdk_s3::Client,
    kms: aws_sdk_kms::Client,
}

impl S3ObjectStore {
    pub fn new(s3: aws_sdk_s3::Client, kms: aws_sdk_kms::Client) -> Self {
        Self { s3, kms }
    }

    /// Build clients from the AWS default provider chain.
    ///
    /// `region` overrides the region from the environment; every operation
    /// is bounded by `timeout`.
    pub async fn from_env(region: Option<String>, timeout: Duration) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(timeout)
                .build(),
        );

        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }

        let sdk_config = loader.load().await;

        info!(
            region = ?sdk_config.region().map(|r| r.as_ref().to_string()),
            timeout_ms = timeout.as_millis() as u64,
            "s3_object_store_configured"
        );

        Self::new(
            aws_sdk_s3::Client::new(&sdk_config),
            aws_sdk_kms::Client::new(&sdk_config),
        )
    }

    async fn unwrap_data_key(
        &self,
        location: &ObjectLocation,
        descriptor: &EncryptionDescriptor,
        key_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let output = self
            .kms
            .decrypt()
            .ciphertext_blob(Blob::new(descriptor.wrapped_key.clone()))
            .set_encryption_context(Some(descriptor.encryption_context.clone()))
            .key_id(key_id)
            .send()
            .await
            .map_err(|e| StoreError::Decrypt {
                location: location.clone(),
                reason: DisplayErrorContext(e).to_string(),
            })?;

        info!(
            location = %location,
            key_id = %key_id,
            wrap_algorithm = ?descriptor.wrap_algorithm,
            "kms_data_key_unwrapped"
        );

        output
            .plaintext()
            .map(|key| key.as_ref().to_vec())
            .ok_or_else(|| StoreError::Decrypt {
                location: location.clone(),
                reason: "KMS returned no plaintext data key".to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, location: &ObjectLocation) -> Result<StoredObject, StoreError> {
        let fetch_error = |reason: String| StoreError::Fetch {
            location: location.clone(),
            reason,
        };

        let output = self
            .s3
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| fetch_error(DisplayErrorContext(e).to_string()))?;

        let metadata = output.metadata().cloned().unwrap_or_default();

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .into_bytes()
            .to_vec();

        info!(
            location = %location,
            body_length = body.len(),
            metadata_keys = metadata.len(),
            "s3_object_fetched"
        );

        Ok(StoredObject { body, metadata })
    }

    async fn get_decrypted(
        &self,
        location: &ObjectLocation,
        key_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let decrypt_error = |reason: String| StoreError::Decrypt {
            location: location.clone(),
            reason,
        };

        let object = self.get(location).await?;

        let descriptor = EncryptionDescriptor::from_metadata(&object.metadata)
            .map_err(|e| decrypt_error(e.to_string()))?
            .ok_or_else(|| decrypt_error("object carries no encryption metadata".to_string()))?;

        let data_key = self.unwrap_data_key(location, &descriptor, key_id).await?;

        let plaintext = decrypt_content(&data_key, &descriptor.iv, &object.body)
            .map_err(|e| decrypt_error(e.to_string()))?;

        info!(
            location = %location,
            key_id = %key_id,
            plaintext_length = plaintext.len(),
            "s3_object_decrypted"
        );

        Ok(plaintext)
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        self.s3
            .delete_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| StoreError::Delete {
                location: location.clone(),
                reason: DisplayErrorContext(e).to_string(),
            })?;

        info!(location = %location, "s3_object_deleted");

        Ok(())
    }
}

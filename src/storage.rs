use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::upload::ImageUpload;

/// StorageError
///
/// Failure reported by the object store. The detail is logged, never returned to clients.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store rejected the upload: {0}")]
    Upload(String),
    #[error("object store rejected the delete: {0}")]
    Delete(String),
}

/// StoredImage
///
/// Where an uploaded image ended up: the public URL saved on the post and the
/// reference id needed to delete it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub url: String,
    pub reference_id: String,
}

// 1. ImageStore Contract
/// ImageStore
///
/// The abstract contract for the external image store. Handlers only see
/// `Arc<dyn ImageStore>`, so the S3 client can be swapped for `MockImageStore` in tests.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Ensures the configured bucket exists. Used in `Env::Local` to provision MinIO.
    async fn ensure_bucket_exists(&self);

    /// Streams the buffered image to the store under the configured folder.
    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, StorageError>;

    /// Removes a previously uploaded object by its reference id.
    async fn delete(&self, reference_id: &str) -> Result<(), StorageError>;
}

/// discard_image
///
/// Best-effort removal used by the post pipeline. Failures are logged and
/// swallowed: a dangling remote object never blocks a post mutation.
pub async fn discard_image(store: &dyn ImageStore, reference_id: &str) {
    if reference_id.is_empty() {
        return;
    }
    if let Err(e) = store.delete(reference_id).await {
        tracing::warn!(reference_id, error = %e, "Failed to delete image from object store");
    }
}

/// object_key
///
/// `{folder}/{uuid}.{extension}`. The original filename never reaches the key.
pub fn object_key(folder: &str, extension: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("{}.{}", Uuid::new_v4(), extension)
    } else {
        format!("{}/{}.{}", folder, Uuid::new_v4(), extension)
    }
}

// 2. The Real Implementation (S3/MinIO)
/// S3ImageStore
///
/// `ImageStore` on top of the AWS SDK for S3. Path-style addressing keeps it
/// compatible with MinIO and other S3-compatible gateways.
#[derive(Clone)]
pub struct S3ImageStore {
    client: s3::Client,
    bucket_name: String,
    folder: String,
    public_base_url: String,
}

/// S3Settings
///
/// Connection settings for `S3ImageStore`, resolved by `AppConfig`.
pub struct S3Settings<'a> {
    pub endpoint: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub bucket: &'a str,
    pub folder: &'a str,
    pub public_base_url: &'a str,
}

impl S3ImageStore {
    pub fn new(settings: S3Settings<'_>) -> Self {
        let credentials = s3::config::Credentials::new(
            settings.access_key,
            settings.secret_key,
            None,
            None,
            "static",
        );

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(settings.endpoint)
            .region(s3::config::Region::new(settings.region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: settings.bucket.to_string(),
            folder: settings.folder.to_string(),
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL an object key is served from.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    /// CreateBucket is idempotent for the owner, so this is safe at every startup.
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket: {:?}", e);
        }
    }

    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, StorageError> {
        let key = object_key(&self.folder, image.kind.extension());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(image.kind.mime_type())
            .body(ByteStream::from(image.bytes.clone()))
            .send()
            .await
            .map_err(|e| StorageError::Upload(format!("{:?}", e)))?;

        tracing::info!(key = %key, bytes = image.bytes.len(), "Image uploaded");

        Ok(StoredImage {
            url: self.public_url(&key),
            reference_id: key,
        })
    }

    async fn delete(&self, reference_id: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(reference_id)
            .send()
            .await
            .map_err(|e| StorageError::Delete(format!("{:?}", e)))?;
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockImageStore
///
/// In-memory `ImageStore` for tests. Records every upload and delete, and can be
/// told to fail either operation.
#[derive(Default)]
pub struct MockImageStore {
    /// When true, `upload` returns a simulated failure.
    pub fail_uploads: bool,
    /// When true, `delete` returns a simulated failure.
    pub fail_deletes: bool,
    uploaded: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    /// Reference ids of every successful upload, in order.
    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Reference ids of every delete attempt, successful or not, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn ensure_bucket_exists(&self) {}

    async fn upload(&self, image: &ImageUpload) -> Result<StoredImage, StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Upload(
                "Mock Storage Error: simulation requested".to_string(),
            ));
        }

        let key = object_key("mock-folder", image.kind.extension());
        if let Ok(mut uploaded) = self.uploaded.lock() {
            uploaded.push(key.clone());
        }

        Ok(StoredImage {
            url: format!("http://localhost:9000/mock-bucket/{}", key),
            reference_id: key,
        })
    }

    async fn delete(&self, reference_id: &str) -> Result<(), StorageError> {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(reference_id.to_string());
        }
        if self.fail_deletes {
            return Err(StorageError::Delete(
                "Mock Storage Error: simulation requested".to_string(),
            ));
        }
        Ok(())
    }
}

/// ImageStoreState
///
/// The concrete type used to share image storage across the application state.
pub type ImageStoreState = Arc<dyn ImageStore>;

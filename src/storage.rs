//! S3-compatible object storage, used to fetch templates by key.
//!
//! Objects are addressed path-style (`{endpoint}/{bucket}/{key}`), which every
//! S3-compatible server accepts. Any path prefix of the endpoint is kept.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use reqwest::Url;
use thiserror::Error;

const CREDENTIALS_PROVIDER: &str = "docgen-config";

/// Connection settings for an S3-compatible bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("storage returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("invalid storage endpoint {0}")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait ObjectStorage {
    /// Downloads the object stored under `key`.
    async fn download_file(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Builds a client for `config`; requests give up after `timeout`.
    pub fn new(config: &StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
        let endpoint = Url::parse(&config.endpoint_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
            .ok_or_else(|| StorageError::InvalidEndpoint(config.endpoint_url.clone()))?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint.as_str().trim_end_matches('/'))
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn download_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let key = key.trim_start_matches('/');
        log::debug!("[S3Storage] GET {}/{key}", self.bucket);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let status = e.raw_response().map(|response| response.status().as_u16());
                let missing = matches!(e.as_service_error(), Some(GetObjectError::NoSuchKey(_)));
                if missing || status == Some(404) {
                    return Err(StorageError::NotFound(key.to_string()));
                }

                let message = DisplayErrorContext(&e).to_string();
                log::error!("[S3Storage] download of {key} failed: {message}");
                return Err(match status {
                    Some(status) => StorageError::Status { status, message },
                    None => StorageError::Request(message),
                });
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .into_bytes();
        log::info!("[S3Storage] downloaded {key}, {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

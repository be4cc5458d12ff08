//! Template retrieval: by URL, by file name inside the templates directory, or by
//! object storage key.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use crate::storage::{ObjectStorage, StorageError};

/// Where a template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateLocator {
    Url(String),
    LocalFile(String),
    StorageKey(String),
}

impl TemplateLocator {
    /// Picks the first non-empty locator, in `url`, `file_name`, `s3_key` order.
    pub fn from_parts(
        url: Option<&str>,
        file_name: Option<&str>,
        storage_key: Option<&str>,
    ) -> Option<Self> {
        let present = |value: Option<&str>| value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned);

        present(url)
            .map(Self::Url)
            .or_else(|| present(file_name).map(Self::LocalFile))
            .or_else(|| present(storage_key).map(Self::StorageKey))
    }
}

/// Raw template bytes with the name they were served under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTemplate {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Lowercase, without the dot; empty when the file name has none.
    pub extension: String,
}

impl FetchedTemplate {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let extension = extension_of(&filename);
        Self {
            bytes,
            filename,
            extension,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("template download failed with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("template download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cannot read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template name {0} must be a plain file name")]
    InvalidPath(String),
    #[error("object storage is not configured")]
    StorageUnavailable,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for FetchError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(key) => FetchError::NotFound(key),
            other => FetchError::Storage(other),
        }
    }
}

#[async_trait]
pub trait TemplateSource {
    async fn fetch_template(&self, locator: &TemplateLocator) -> Result<FetchedTemplate, FetchError>;
}

pub struct TemplateFetcher {
    client: reqwest::Client,
    templates_dir: PathBuf,
    storage: Option<Arc<dyn ObjectStorage + Send + Sync>>,
}

impl TemplateFetcher {
    pub fn new(
        client: reqwest::Client,
        templates_dir: impl Into<PathBuf>,
        storage: Option<Arc<dyn ObjectStorage + Send + Sync>>,
    ) -> Self {
        Self {
            client,
            templates_dir: templates_dir.into(),
            storage,
        }
    }

    /// Client for template downloads: redirects are not followed.
    pub fn download_client(timeout: std::time::Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .pool_idle_timeout(std::time::Duration::from_secs(900))
            .user_agent("Mozilla/5.0")
            .build()
    }

    async fn fetch_url(&self, url: &str) -> Result<FetchedTemplate, FetchError> {
        log::debug!("[fetch_template] downloading {url}");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: body.chars().take(200).collect(),
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .unwrap_or_else(|| url_basename(url));
        let bytes = response.bytes().await?;

        log::debug!("[fetch_template] downloaded {filename}, {} bytes", bytes.len());
        Ok(FetchedTemplate::new(bytes.to_vec(), filename))
    }

    async fn fetch_local(&self, name: &str) -> Result<FetchedTemplate, FetchError> {
        let path = resolve_local(&self.templates_dir, name)?;
        log::debug!("[fetch_template] reading local file {}", path.display());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::error!("[fetch_template] file not found: {}", path.display());
                return Err(FetchError::NotFound(name.to_string()));
            }
            Err(source) => {
                return Err(FetchError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        Ok(FetchedTemplate::new(bytes, filename))
    }

    async fn fetch_stored(&self, key: &str) -> Result<FetchedTemplate, FetchError> {
        let storage = self.storage.as_ref().ok_or(FetchError::StorageUnavailable)?;
        let bytes = storage.download_file(key).await?;
        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        Ok(FetchedTemplate::new(bytes, filename))
    }
}

#[async_trait]
impl TemplateSource for TemplateFetcher {
    async fn fetch_template(&self, locator: &TemplateLocator) -> Result<FetchedTemplate, FetchError> {
        match locator {
            TemplateLocator::Url(url) => self.fetch_url(url).await,
            TemplateLocator::LocalFile(name) => self.fetch_local(name).await,
            TemplateLocator::StorageKey(key) => self.fetch_stored(key).await,
        }
    }
}

/// Joins `name` onto `dir`, refusing absolute paths and `..` components.
pub fn resolve_local(dir: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let relative = Path::new(name);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !plain || name.trim().is_empty() {
        return Err(FetchError::InvalidPath(name.to_string()));
    }
    Ok(dir.join(relative))
}

/// File name from a `Content-Disposition` header value.
pub fn disposition_filename(header: &str) -> Option<String> {
    let (_, tail) = header.rsplit_once("filename=")?;
    let name = tail.trim_matches(|c| c == '"' || c == ';' || c == ' ');
    (!name.is_empty()).then(|| name.to_string())
}

/// Last path segment of `url`, percent-decoded.
pub fn url_basename(url: &str) -> String {
    let path = Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    urlencoding::decode(last)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| last.to_string())
}

pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

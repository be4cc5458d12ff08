use std::sync::Arc;

use crate::config::AppConfig;
use crate::convert::LibreOfficeConverter;
use crate::fetch::TemplateFetcher;
use crate::generate::DocumentService;
use crate::storage::{ObjectStorage, S3Storage};

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
}

impl AppState {
    pub fn new(documents: Arc<DocumentService>) -> Self {
        Self { documents }
    }

    /// Wires the production collaborators from configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let download_client = TemplateFetcher::download_client(config.http_timeout)?;

        let storage: Option<Arc<dyn ObjectStorage + Send + Sync>> = match &config.storage {
            Some(storage_config) => {
                log::info!("[AppState] object storage enabled: {storage_config:?}");
                Some(Arc::new(S3Storage::new(storage_config, config.http_timeout)?))
            }
            None => {
                log::info!("[AppState] object storage not configured, s3_key requests will fail");
                None
            }
        };

        let fetcher = TemplateFetcher::new(download_client, config.templates_dir.clone(), storage);
        let converter = LibreOfficeConverter::new(
            config.converter.binary.clone(),
            config.converter.timeout,
        );

        Ok(Self::new(Arc::new(DocumentService::new(
            Arc::new(fetcher),
            Arc::new(converter),
        ))))
    }
}

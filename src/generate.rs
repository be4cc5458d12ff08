//! Document generation: fetch a template, render it with the caller's data and
//! optionally convert the result to PDF.

use std::path::Path;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::Value;
use thiserror::Error;

use crate::convert::{ConversionError, PdfConverter};
use crate::fetch::{FetchError, TemplateLocator, TemplateSource};
use crate::render::{self, RenderError};
use crate::{metrics, ErrorResponse};

const FALLBACK_NAME: &str = "document";

pub const DOCX_MEDIA_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MEDIA_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PDF_MEDIA_TYPE: &str = "application/pdf";
pub const BINARY_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("render worker failed: {0}")]
    Worker(String),
}

impl GenerateError {
    /// Short label used for logs and the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerateError::Fetch(FetchError::NotFound(_)) => "not_found",
            GenerateError::Fetch(FetchError::InvalidPath(_)) => "invalid_request",
            GenerateError::Fetch(_) => "fetch",
            GenerateError::Render(RenderError::UnsupportedFormat(_)) => "unsupported_format",
            GenerateError::Render(RenderError::InvalidTemplateOrData(_)) => "invalid_template",
            GenerateError::Conversion(_) => "conversion",
            GenerateError::Worker(_) => "worker",
        }
    }
}

impl ResponseError for GenerateError {
    fn status_code(&self) -> StatusCode {
        match self {
            GenerateError::Fetch(FetchError::NotFound(_)) => StatusCode::NOT_FOUND,
            GenerateError::Fetch(FetchError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            GenerateError::Fetch(FetchError::StorageUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            GenerateError::Fetch(_) => StatusCode::BAD_GATEWAY,
            GenerateError::Render(_) => StatusCode::BAD_REQUEST,
            GenerateError::Conversion(_) | GenerateError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.to_string();
        let body = match status {
            StatusCode::NOT_FOUND => ErrorResponse::not_found(&message),
            StatusCode::BAD_REQUEST => ErrorResponse::bad_request(&message),
            StatusCode::INTERNAL_SERVER_ERROR => ErrorResponse::internal_error(&message),
            other => ErrorResponse::new(other.canonical_reason().unwrap_or("Error"), &message),
        };
        HttpResponse::build(status).json(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub media_type: &'static str,
}

/// Composes template retrieval, rendering and PDF conversion.
pub struct DocumentService {
    source: Arc<dyn TemplateSource + Send + Sync>,
    converter: Arc<dyn PdfConverter + Send + Sync>,
}

impl DocumentService {
    pub fn new(
        source: Arc<dyn TemplateSource + Send + Sync>,
        converter: Arc<dyn PdfConverter + Send + Sync>,
    ) -> Self {
        Self { source, converter }
    }

    pub async fn generate(
        &self,
        locator: &TemplateLocator,
        document_data: Value,
        output_name: &str,
        is_pdf: bool,
    ) -> Result<GeneratedDocument, GenerateError> {
        let result = self.run(locator, document_data, output_name, is_pdf).await;
        match &result {
            Ok(document) => {
                let format = Path::new(&document.filename)
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default();
                metrics::record_document(&format);
            }
            Err(e) => metrics::record_error(e.kind()),
        }
        result
    }

    async fn run(
        &self,
        locator: &TemplateLocator,
        document_data: Value,
        output_name: &str,
        is_pdf: bool,
    ) -> Result<GeneratedDocument, GenerateError> {
        let template = self.source.fetch_template(locator).await?;
        log::debug!(
            "[generate] fetched {} ({} bytes)",
            template.filename,
            template.bytes.len()
        );

        let mut extension = template.extension.clone();
        let render_extension = extension.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            render::render(&render_extension, &template.bytes, &document_data)
        })
        .await
        .map_err(|e| GenerateError::Worker(e.to_string()))?;

        let mut bytes = match rendered {
            Ok(bytes) => {
                log::info!("[generate] document rendered: format={extension}");
                bytes
            }
            Err(e) => {
                log::warn!("[generate] invalid template or data: {e}");
                return Err(e.into());
            }
        };

        if is_pdf {
            bytes = match self.converter.convert_to_pdf(bytes, &extension).await {
                Ok(pdf) => pdf,
                Err(e) => {
                    log::error!("[generate] PDF conversion failed: {e}");
                    return Err(e.into());
                }
            };
            extension = "pdf".to_string();
            log::info!("[generate] document converted to PDF");
        }

        let filename = format!("{}.{extension}", sanitize_output_name(output_name));
        let media_type = media_type_for(&extension);
        log::info!("[generate] sending {filename}, media_type={media_type}");

        Ok(GeneratedDocument {
            bytes,
            filename,
            media_type,
        })
    }
}

pub fn media_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "docx" => DOCX_MEDIA_TYPE,
        "xlsx" => XLSX_MEDIA_TYPE,
        "pdf" => PDF_MEDIA_TYPE,
        _ => BINARY_MEDIA_TYPE,
    }
}

/// Base name for the output file: last path component, quotes removed.
pub fn sanitize_output_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned = sanitize_filename::sanitize(last).replace(['"', '\''], "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `Content-Disposition` value carrying a UTF-8 file name.
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename*=UTF-8''{}", urlencoding::encode(filename))
}

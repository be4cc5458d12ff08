//! Template rendering core.
//!
//! `render` is the single entry point: it picks the DOCX or XLSX path by file
//! extension, normalizes the caller's JSON data and hands it to the matching renderer.
//!
//! - DOCX templates are evaluated as Jinja templates over the nested, normalized context.
//! - XLSX templates get literal `{{ key }}` substitution from the flattened context.

pub mod context;
pub mod dates;
pub mod docx;
mod package;
mod scope;
pub mod xlsx;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

pub use context::{flatten, flatten_with_separator, normalize, FlattenedContext, NormalizedContext};
pub use dates::{format_date, is_date_key, DEFAULT_TOKEN};
pub use docx::render_docx;
pub use xlsx::render_xlsx;

/// Errors raised while rendering a template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("invalid template or data: {0}")]
    InvalidTemplateOrData(String),
    #[error("unsupported template type: {0}")]
    UnsupportedFormat(String),
}

impl RenderError {
    pub(crate) fn invalid(detail: impl fmt::Display) -> Self {
        Self::InvalidTemplateOrData(detail.to_string())
    }
}

/// Template container formats the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateFormat {
    Docx,
    Xlsx,
}

impl TemplateFormat {
    /// Case-insensitive; a leading dot is accepted.
    pub fn from_extension(extension: &str) -> Result<Self, RenderError> {
        let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "docx" => Ok(Self::Docx),
            "xlsx" => Ok(Self::Xlsx),
            _ => Err(RenderError::UnsupportedFormat(extension.to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Renders `template` with `data`, dispatching on the template's extension.
///
/// The extension is checked before the data or the template bytes are looked at.
pub fn render(extension: &str, template: &[u8], data: &Value) -> Result<Vec<u8>, RenderError> {
    let format = TemplateFormat::from_extension(extension)?;
    let context = normalize(data);

    log::debug!(
        "[render] {format} template, {} bytes, {} top-level keys",
        template.len(),
        context.as_map().len()
    );

    match format {
        TemplateFormat::Docx => render_docx(template, &context),
        TemplateFormat::Xlsx => render_xlsx(template, &flatten(&context)),
    }
}

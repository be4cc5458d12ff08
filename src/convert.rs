//! PDF conversion through a headless LibreOffice process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("PDF conversion I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF conversion timed out after {0:?}")]
    Timeout(Duration),
    #[error("converter exited with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("converter produced no PDF output")]
    MissingOutput,
}

#[async_trait]
pub trait PdfConverter {
    /// Converts a rendered document with the given source extension to PDF.
    async fn convert_to_pdf(&self, document: Vec<u8>, extension: &str) -> Result<Vec<u8>, ConversionError>;
}

/// Runs `libreoffice --headless --convert-to pdf` in a scratch directory.
///
/// Each call gets its own user profile so concurrent conversions do not contend
/// for the profile lock.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PdfConverter for LibreOfficeConverter {
    async fn convert_to_pdf(&self, document: Vec<u8>, extension: &str) -> Result<Vec<u8>, ConversionError> {
        let work_dir = tempdir()?;
        let input_path = work_dir.path().join(format!("input.{extension}"));
        let output_path = work_dir.path().join("input.pdf");
        let profile = format!("file://{}", work_dir.path().join("profile").display());

        tokio::fs::write(&input_path, &document).await?;

        let child = Command::new(&self.binary)
            .arg(format!("-env:UserInstallation={profile}"))
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(work_dir.path())
            .arg(&input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        log::debug!("[convert_to_pdf] converting {} bytes of {extension}", document.len());
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionError::Timeout(self.timeout))??;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ConversionError::Exit { code, stderr });
        }

        match tokio::fs::read(&output_path).await {
            Ok(pdf) => Ok(pdf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConversionError::MissingOutput),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let converter = LibreOfficeConverter::new("/nonexistent/soffice-binary", Duration::from_secs(5));
        let result = converter.convert_to_pdf(b"doc".to_vec(), "docx").await;
        assert!(matches!(result, Err(ConversionError::Io(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_converter_reports_exit_code() {
        let converter = LibreOfficeConverter::new("false", Duration::from_secs(5));
        let result = converter.convert_to_pdf(b"doc".to_vec(), "docx").await;
        assert!(matches!(result, Err(ConversionError::Exit { code: 1, .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converter_without_output_is_missing_output() {
        let converter = LibreOfficeConverter::new("true", Duration::from_secs(5));
        let result = converter.convert_to_pdf(b"doc".to_vec(), "xlsx").await;
        assert!(matches!(result, Err(ConversionError::MissingOutput)));
    }
}

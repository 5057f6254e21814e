//! Document format conversion.
//!
//! Conversion is an opaque collaborator step: `.docx` inputs become PDFs
//! before upload, with the original archived. The pipeline core never
//! inspects document contents.

use super::safe_move;
use crate::errors::ConvertError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The conversion collaborator capability.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Converts the input to PDF, optionally archiving the original into
    /// `archive_dir`, and returns the PDF path.
    async fn convert_to_pdf(
        &self,
        input: &Path,
        archive_dir: Option<&Path>,
    ) -> Result<PathBuf, ConvertError>;
}

/// Converter backed by a headless LibreOffice invocation.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: PathBuf,
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("soffice"),
        }
    }
}

impl SofficeConverter {
    /// Creates a converter using the default `soffice` binary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the LibreOffice binary path.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert_to_pdf(
        &self,
        input: &Path,
        archive_dir: Option<&Path>,
    ) -> Result<PathBuf, ConvertError> {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if extension != "docx" && extension != "doc" {
            return Err(ConvertError::Unsupported { extension });
        }

        let out_dir = input.parent().unwrap_or_else(|| Path::new("."));
        let output = tokio::process::Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ConvertError::Tool {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let pdf_path = input.with_extension("pdf");
        if !tokio::fs::try_exists(&pdf_path).await? {
            return Err(ConvertError::MissingOutput { path: pdf_path });
        }
        debug!(input = %input.display(), output = %pdf_path.display(), "Converted to PDF");

        if let Some(archive_dir) = archive_dir {
            tokio::fs::create_dir_all(archive_dir).await?;
            let file_name = input.file_name().unwrap_or_default();
            let archived = safe_move(input, &archive_dir.join(file_name)).await?;
            info!(archived = %archived.display(), "Archived pre-conversion original");
        }

        Ok(pdf_path)
    }
}

/// Converter that accepts PDFs as-is and rejects everything else.
///
/// Useful when the input directory is known to hold converted files
/// already.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfPassthrough;

#[async_trait]
impl DocumentConverter for PdfPassthrough {
    async fn convert_to_pdf(
        &self,
        input: &Path,
        _archive_dir: Option<&Path>,
    ) -> Result<PathBuf, ConvertError> {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if extension == "pdf" {
            Ok(input.to_path_buf())
        } else {
            Err(ConvertError::Unsupported { extension })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_accepts_pdf() {
        let path = Path::new("dir/resume.pdf");
        let out = PdfPassthrough
            .convert_to_pdf(path, None)
            .await
            .expect("passthrough");
        assert_eq!(out, path);
    }

    #[tokio::test]
    async fn test_passthrough_rejects_other_formats() {
        let err = PdfPassthrough
            .convert_to_pdf(Path::new("resume.docx"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported { extension } if extension == "docx"));
    }

    #[tokio::test]
    async fn test_soffice_rejects_non_docx() {
        let err = SofficeConverter::new()
            .convert_to_pdf(Path::new("resume.png"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported { .. }));
    }
}

//! Convert stage: DOCX artifact → PDF through a headless office binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::pipeline::{ConvertJob, Pipeline};
use crate::storage::{keys, StorageError};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to launch converter: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("converter timed out after {0:?}")]
    Timeout(Duration),

    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Turns a document on disk into a PDF written somewhere inside `out_dir`.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<(), ConvertError>;
}

/// LibreOffice (`soffice`) in headless mode.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: String,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<(), ConvertError> {
        let child = Command::new(&self.binary)
            .args(["--headless", "--norestore", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConvertError::Timeout(self.timeout))??;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ConvertError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!(source = %source.display(), "Converter reported: {stderr}");
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "Converter finished");
        Ok(())
    }
}

/// `{stem}.pdf` when present, otherwise any `.pdf` in the directory.
pub async fn locate_pdf(out_dir: &Path, stem: &str) -> std::io::Result<Option<PathBuf>> {
    let expected = out_dir.join(format!("{stem}.pdf"));
    if tokio::fs::try_exists(&expected).await? {
        return Ok(Some(expected));
    }

    let mut entries = tokio::fs::read_dir(out_dir).await?;
    let mut found: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if keys::extension(&path.to_string_lossy()).as_deref() == Some("pdf") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

fn conversion(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Conversion(format!("{context}: {e}"))
}

pub async fn run(pipeline: &Pipeline, job: ConvertJob) -> Result<String, PipelineError> {
    let started = Instant::now();
    let settings = &pipeline.settings;
    let job_id = keys::validate_segment(&job.job_id)
        .map_err(|e| PipelineError::Input(e.to_string()))?;
    let pdf_key = match job.out_key.as_deref() {
        Some(out_key) => keys::validate_key(out_key)
            .map_err(|e| PipelineError::Input(e.to_string()))?
            .to_string(),
        None => keys::pdf(job_id),
    };
    info!(job_id, docx_key = %job.docx_key, pdf_key = %pdf_key, "Convert started");

    let docx = pipeline.store.get(&job.docx_key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
            PipelineError::Input(format!("cannot read {}: {e}", job.docx_key))
        }
        other => PipelineError::Storage(other),
    })?;

    // Scratch space is per delivery; the directory is removed on close.
    tokio::fs::create_dir_all(&settings.scratch_dir)
        .await
        .map_err(|e| conversion("cannot create scratch dir", e))?;
    let scratch = tempfile::Builder::new()
        .prefix("convert-")
        .tempdir_in(&settings.scratch_dir)
        .map_err(|e| conversion("cannot create scratch dir", e))?;
    let source = scratch.path().join(format!("{job_id}.docx"));
    let out_dir = scratch.path().join("out");
    tokio::fs::write(&source, &docx)
        .await
        .map_err(|e| conversion("cannot stage DOCX", e))?;
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(|e| conversion("cannot create output dir", e))?;

    pipeline
        .converter
        .convert(&source, &out_dir)
        .await
        .map_err(|e| conversion("conversion failed", e))?;

    let pdf_path = locate_pdf(&out_dir, job_id)
        .await
        .map_err(|e| conversion("cannot scan output dir", e))?
        .ok_or_else(|| {
            PipelineError::Conversion("PDF file not found after conversion".to_string())
        })?;
    let pdf = tokio::fs::read(&pdf_path)
        .await
        .map_err(|e| conversion("cannot read PDF", e))?;

    pipeline
        .store
        .put(&pdf_key, Bytes::from(pdf), keys::PDF_MIME)
        .await?;

    let scratch_path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(job_id, scratch = %scratch_path.display(), "Failed to clean scratch dir: {e}");
    }

    info!(
        job_id,
        pdf_key = %pdf_key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Convert completed"
    );
    Ok(pdf_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakeOutput, Harness};

    fn job() -> ConvertJob {
        ConvertJob {
            job_id: "cv-1".into(),
            docx_key: "docx/cv-1.docx".into(),
            out_key: None,
        }
    }

    #[tokio::test]
    async fn test_pdf_is_stored_at_default_key() {
        let h = Harness::new(vec![]);
        h.put("docx/cv-1.docx", "docx bytes").await;

        let key = run(&h.pipeline, job()).await.unwrap();
        assert_eq!(key, "pdf/cv-1.pdf");
        assert!(h.text("pdf/cv-1.pdf").await.starts_with("%PDF"));
        assert_eq!(
            h.store.content_type("pdf/cv-1.pdf").as_deref(),
            Some(keys::PDF_MIME)
        );
    }

    #[tokio::test]
    async fn test_out_key_and_unexpected_output_name() {
        let h = Harness::new(vec![]);
        h.converter.set_output(FakeOutput::OtherName);
        h.put("docx/cv-1.docx", "docx bytes").await;

        let mut j = job();
        j.out_key = Some("previews/cv-1.pdf".into());
        assert_eq!(run(&h.pipeline, j).await.unwrap(), "previews/cv-1.pdf");
        assert!(h.store.keys().contains(&"previews/cv-1.pdf".to_string()));
    }

    #[tokio::test]
    async fn test_missing_output_is_a_conversion_error() {
        let h = Harness::new(vec![]);
        h.converter.set_output(FakeOutput::Nothing);
        h.put("docx/cv-1.docx", "docx bytes").await;

        let err = run(&h.pipeline, job()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conversion(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_converter_failure_is_a_conversion_error() {
        let h = Harness::new(vec![]);
        h.converter.set_output(FakeOutput::Fail);
        h.put("docx/cv-1.docx", "docx bytes").await;

        let err = run(&h.pipeline, job()).await.unwrap_err();
        assert!(err.to_string().contains("conversion failed"));
        assert!(!h.store.keys().contains(&"pdf/cv-1.pdf".to_string()));
    }

    #[tokio::test]
    async fn test_scratch_is_cleaned_up() {
        let h = Harness::new(vec![]);
        h.put("docx/cv-1.docx", "docx bytes").await;
        run(&h.pipeline, job()).await.unwrap();

        let mut entries = std::fs::read_dir(&h.pipeline.settings.scratch_dir).unwrap();
        assert!(entries.all(|e| !e
            .unwrap()
            .file_name()
            .to_string_lossy()
            .starts_with("convert-")));
    }

    #[tokio::test]
    async fn test_locate_pdf_prefers_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("cv-1.pdf"), b"x").unwrap();
        let found = locate_pdf(dir.path(), "cv-1").await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "cv-1.pdf");

        let empty = tempfile::tempdir().unwrap();
        assert!(locate_pdf(empty.path(), "cv-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let converter = SofficeConverter::new("/nonexistent/soffice", Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let err = converter
            .convert(&dir.path().join("in.docx"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Spawn(_)));
    }
}

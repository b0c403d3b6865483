//! Template stage: structured JSON → DOCX, then optionally Convert.

pub mod docx;

use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::pipeline::{ConvertJob, Pipeline, TemplateJob};
use crate::queue::enqueue_job;
use crate::storage::{keys, StorageError};

pub use docx::{render_docx, sample_template};

const NO_TEMPLATE: &str = "No template file available";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOutcome {
    pub docx_key: Option<String>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TemplateOutcome {
    fn rendered(docx_key: String) -> Self {
        Self {
            docx_key: Some(docx_key),
            skipped: false,
            reason: None,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            docx_key: None,
            skipped: true,
            reason: Some(reason.to_string()),
        }
    }
}

/// Job-specific template artifact first, then the configured search paths.
async fn load_template(
    pipeline: &Pipeline,
    job: &TemplateJob,
) -> Result<Option<(Vec<u8>, String)>, PipelineError> {
    if let Some(key) = job.template_key.as_deref() {
        match pipeline.store.get(key).await {
            Ok(bytes) => return Ok(Some((bytes.to_vec(), key.to_string()))),
            Err(e) if e.is_not_found() => {
                warn!(job_id = %job.job_id, template_key = key, "Template artifact not found, trying search paths");
            }
            Err(e) => return Err(e.into()),
        }
    }

    for path in &pipeline.settings.template_paths {
        match tokio::fs::read(path).await {
            Ok(bytes) => return Ok(Some((bytes, path.display().to_string()))),
            Err(e) => debug!(path = %path.display(), "Template path unavailable: {e}"),
        }
    }
    Ok(None)
}

/// Structured JSON plus `role`/`company` unless the document defines them.
fn render_context(document: Value, role: &str, company: &str) -> Result<Value, PipelineError> {
    let Value::Object(mut map) = document else {
        return Err(PipelineError::Template(
            "structured JSON is not an object".to_string(),
        ));
    };
    insert_absent(&mut map, "role", role);
    insert_absent(&mut map, "company", company);
    Ok(Value::Object(map))
}

fn insert_absent(map: &mut Map<String, Value>, key: &str, value: &str) {
    if !map.contains_key(key) {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub async fn run(pipeline: &Pipeline, job: TemplateJob) -> Result<TemplateOutcome, PipelineError> {
    let started = Instant::now();
    let job_id = keys::validate_segment(&job.job_id)
        .map_err(|e| PipelineError::Input(e.to_string()))?;
    info!(job_id, json_key = %job.json_key, want_pdf = job.want_pdf, "Template started");

    // Step 1: Template (absence skips the stage)
    let Some((template, source)) = load_template(pipeline, &job).await? else {
        warn!(
            job_id,
            paths = ?pipeline.settings.template_paths,
            "No template found, skipping document stage"
        );
        return Ok(TemplateOutcome::skipped(NO_TEMPLATE));
    };
    debug!(job_id, source = %source, "Template loaded");

    // Step 2: Structured JSON
    let raw = pipeline.store.get(&job.json_key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
            PipelineError::Input(format!("cannot read {}: {e}", job.json_key))
        }
        other => PipelineError::Storage(other),
    })?;
    let document: Value = serde_json::from_slice(&raw).map_err(|e| {
        PipelineError::Template(format!("Invalid or unreadable JSON input for template: {e}"))
    })?;
    let ctx = render_context(document, &job.role, &job.company)?;

    // Step 3: Render off the async runtime
    let rendered = tokio::task::spawn_blocking(move || render_docx(&template, &ctx))
        .await
        .map_err(|e| PipelineError::Template(format!("render task aborted: {e}")))?
        .map_err(|e| PipelineError::Template(e.to_string()))?;

    // Step 4: Persist, then hand off to Convert when a PDF was asked for
    let docx_key = keys::docx(job_id);
    pipeline
        .store
        .put(&docx_key, Bytes::from(rendered), keys::DOCX_MIME)
        .await?;

    if job.want_pdf {
        let next = ConvertJob {
            job_id: job_id.to_string(),
            docx_key: docx_key.clone(),
            out_key: None,
        };
        enqueue_job(pipeline.queue.as_ref(), &next).await?;
    }

    info!(
        job_id,
        docx_key = %docx_key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Template completed"
    );
    Ok(TemplateOutcome::rendered(docx_key))
}

/// Writes the sample template for `tailor template init`.
pub async fn write_sample(path: &Path) -> anyhow::Result<usize> {
    use anyhow::Context;

    let bytes = sample_template()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    tokio::fs::write(path, &bytes)
        .await
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(bytes.len())
}

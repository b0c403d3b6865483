//! Extract stage: raw upload → normalized plain text.
//!
//! Flow: fetch raw bytes → pick extractor → text + links (blocking pool) →
//!       normalize/truncate/footer → persist text + meta → optional JD file →
//!       enqueue Optimize.

pub mod extractors;
pub mod links;
pub mod normalize;

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::errors::PipelineError;
use crate::pipeline::{BestEffort, ExtractJob, OptimizeJob, Pipeline};
use crate::prompts::normalize_label;
use crate::queue::enqueue_job;
use crate::storage::{keys, ArtifactStore, StorageError};
use extractors::DocumentKind;
use links::DetectedLinks;

/// Persisted at `meta/{jobId}.extract.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractMeta {
    pub job_id: String,
    pub input_key: String,
    pub mime_type: String,
    pub bytes_in: usize,
    pub char_count: usize,
    pub truncated: bool,
    pub sha256: String,
    pub warnings: Vec<String>,
    pub links: Vec<String>,
    pub emails_found: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutcome {
    pub text_key: String,
    pub meta_key: String,
    pub jd_key: Option<String>,
    pub truncated: bool,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

async fn fetch_input(
    store: &dyn ArtifactStore,
    key: &str,
    max_bytes: usize,
) -> Result<Bytes, PipelineError> {
    let bytes = store.get(key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
            PipelineError::Input(format!("cannot read input {key}: {e}"))
        }
        other => PipelineError::Storage(other),
    })?;
    if bytes.is_empty() {
        return Err(PipelineError::Input(
            "Input file is empty or unreadable".to_string(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::Input(format!(
            "Input exceeds max size: {} > {max_bytes}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Text and best-effort links, computed off the async runtime.
async fn extract_blocking(
    kind: DocumentKind,
    bytes: Bytes,
) -> Result<(String, Result<DetectedLinks, String>), PipelineError> {
    tokio::task::spawn_blocking(move || {
        let text = extractors::extract_text(kind, &bytes)?;
        let found = links::detect_links(kind, &bytes, &text);
        Ok((text, found))
    })
    .await
    .map_err(|e| PipelineError::Extraction(format!("Extraction error: extractor aborted: {e}")))?
}

/// Extracts the optional job-description upload to `jd/{jobId}.txt`.
async fn extract_jd_file(
    pipeline: &Pipeline,
    job_id: &str,
    jd_input_key: &str,
) -> Result<String, String> {
    let bytes = fetch_input(
        pipeline.store.as_ref(),
        jd_input_key,
        pipeline.settings.extract_max_bytes,
    )
    .await
    .map_err(|e| e.to_string())?;
    let kind = DocumentKind::detect(None, jd_input_key).map_err(|e| e.to_string())?;
    let (raw, _) = extract_blocking(kind, bytes).await.map_err(|e| e.to_string())?;

    let text = normalize::normalize_text(&raw);
    let text = normalize::truncate_chars(&text, pipeline.settings.extract_char_limit);
    let jd_key = keys::jd_text(job_id);
    pipeline
        .store
        .put(&jd_key, Bytes::from(text.to_string()), keys::TEXT_MIME)
        .await
        .map_err(|e| e.to_string())?;
    Ok(jd_key)
}

pub async fn run(pipeline: &Pipeline, job: ExtractJob) -> Result<ExtractOutcome, PipelineError> {
    let started = Instant::now();
    let settings = &pipeline.settings;
    let job_id = keys::validate_segment(&job.job_id)
        .map_err(|e| PipelineError::Input(e.to_string()))?
        .to_string();
    info!(job_id = %job_id, input_key = %job.input_key, "Extract started");

    // Step 1: Fetch and bound the input
    let bytes = fetch_input(
        pipeline.store.as_ref(),
        &job.input_key,
        settings.extract_max_bytes,
    )
    .await?;
    let bytes_in = bytes.len();
    let digest = sha256_hex(&bytes);

    // Step 2: Extract text, then links best-effort
    let kind = DocumentKind::detect(job.mime_type.as_deref(), &job.input_key)?;
    let mime_type = job
        .mime_type
        .clone()
        .unwrap_or_else(|| keys::detect_mime(&job.input_key));
    let (raw_text, found) = extract_blocking(kind, bytes).await?;

    let mut warnings = Vec::new();
    let detected = BestEffort::or_degrade(found, "link detection failed", DetectedLinks::default)
        .settle(&job_id, &mut warnings);

    // Step 3: Normalize, truncate, append links footer
    let normalized = normalize::normalize_text(&raw_text);
    let composed = normalize::compose(
        &normalized,
        &detected,
        settings.extract_char_limit,
        settings.links_append,
        settings.links_max,
    );

    // Step 4: Persist text and meta
    let text_key = keys::text(&job_id);
    let meta_key = keys::extract_meta(&job_id);
    let meta = ExtractMeta {
        job_id: job_id.clone(),
        input_key: job.input_key.clone(),
        mime_type,
        bytes_in,
        char_count: composed.text.chars().count(),
        truncated: composed.truncated,
        sha256: digest,
        warnings: Vec::new(),
        links: detected.urls.clone(),
        emails_found: detected.emails.clone(),
    };

    pipeline
        .store
        .put(&text_key, Bytes::from(composed.text), keys::TEXT_MIME)
        .await?;

    // Step 5: Optional JD upload
    let jd_key = match job.jd_input_key.as_deref() {
        Some(jd_input_key) => BestEffort::or_degrade(
            extract_jd_file(pipeline, &job_id, jd_input_key)
                .await
                .map(Some),
            "JD file extraction failed",
            || None,
        )
        .settle(&job_id, &mut warnings),
        None => None,
    };

    let meta = ExtractMeta { warnings, ..meta };
    let meta_bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| PipelineError::Input(format!("cannot encode extract meta: {e}")))?;
    pipeline
        .store
        .put(&meta_key, Bytes::from(meta_bytes), keys::JSON_MIME)
        .await?;

    // Step 6: Hand off to Optimize
    let next = OptimizeJob {
        job_id: job_id.clone(),
        text_key: text_key.clone(),
        role: job.role,
        company: job.company,
        want_pdf: job.want_pdf,
        prompt: Some(effective_label(
            job.prompt.as_deref(),
            &pipeline.settings.default_prompt,
        )),
        template_key: job.template_key,
        links: links::merge_links(&job.links, &detected),
        jd_text: job.jd_text,
        jd_url: job.jd_url,
        jd_key: jd_key.clone(),
    };
    enqueue_job(pipeline.queue.as_ref(), &next).await?;

    info!(
        job_id = %job_id,
        text_key = %text_key,
        truncated = meta.truncated,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Extract completed"
    );

    Ok(ExtractOutcome {
        text_key,
        meta_key,
        jd_key,
        truncated: meta.truncated,
    })
}

/// The label Optimize will run under, fixed here so its dedup key matches.
fn effective_label(requested: Option<&str>, default_prompt: &str) -> String {
    let requested = requested.filter(|p| !p.trim().is_empty());
    normalize_label(Some(requested.unwrap_or(default_prompt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::Harness;
    use crate::queue::Stage;

    fn job(input_key: &str) -> ExtractJob {
        ExtractJob {
            job_id: "cv-1".into(),
            input_key: input_key.into(),
            role: "Software Engineer".into(),
            links: vec!["https://linkedin.com/in/jane".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plain_text_is_normalized_and_handed_off() {
        let h = Harness::new(vec![]);
        h.put("raw/cv-1.txt", "Jane   Doe\r\n\r\n\r\n\r\nhttps://jane.dev\n").await;

        let outcome = run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();
        assert_eq!(outcome.text_key, "text/cv-1.txt");

        let text = h.text("text/cv-1.txt").await;
        assert!(text.starts_with("Jane Doe\n\nhttps://jane.dev\n=== LINKS DETECTED ==="));
        assert!(!text.contains('\r'));

        let meta: serde_json::Value =
            serde_json::from_str(&h.text("meta/cv-1.extract.json").await).unwrap();
        assert_eq!(meta["jobId"], "cv-1");
        assert_eq!(meta["links"][0], "https://jane.dev");
        assert_eq!(meta["truncated"], false);
        assert_eq!(meta["sha256"].as_str().unwrap().len(), 64);

        let next = h.queue.pending_payloads(Stage::Optimize);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0]["textKey"], "text/cv-1.txt");
        assert_eq!(next[0]["role"], "Software Engineer");
        assert_eq!(
            next[0]["links"],
            serde_json::json!(["https://linkedin.com/in/jane", "https://jane.dev"])
        );
    }

    #[tokio::test]
    async fn test_optimize_job_carries_the_configured_default_label() {
        let mut h = Harness::new(vec![]);
        h.pipeline.settings.default_prompt = "v2".into();
        h.put("raw/cv-1.txt", "Jane Doe").await;
        run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();

        let mut explicit = job("raw/cv-1.txt");
        explicit.job_id = "cv-2".into();
        explicit.prompt = Some("V1".into());
        h.put("raw/cv-2.txt", "Jane Doe").await;
        explicit.input_key = "raw/cv-2.txt".into();
        run(&h.pipeline, explicit).await.unwrap();

        let next = h.queue.pending_payloads(Stage::Optimize);
        assert_eq!(next[0]["prompt"], "v2");
        assert_eq!(next[1]["prompt"], "v1");
        assert_eq!(effective_label(Some("  "), "vjd1"), "vjd1");
    }

    #[tokio::test]
    async fn test_links_footer_can_be_disabled() {
        let mut h = Harness::new(vec![]);
        h.pipeline.settings.links_append = false;
        h.put("raw/cv-1.txt", "Jane https://jane.dev").await;
        run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();
        assert_eq!(h.text("text/cv-1.txt").await, "Jane https://jane.dev");
    }

    #[tokio::test]
    async fn test_empty_input_is_an_input_error() {
        let h = Harness::new(vec![]);
        h.put("raw/cv-1.txt", "").await;
        let err = run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_oversized_input_is_rejected() {
        let mut h = Harness::new(vec![]);
        h.pipeline.settings.extract_max_bytes = 4;
        h.put("raw/cv-1.txt", "too long").await;
        let err = run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap_err();
        assert!(err.to_string().contains("exceeds max size"));
    }

    #[tokio::test]
    async fn test_missing_input_is_an_input_error() {
        let h = Harness::new(vec![]);
        let err = run(&h.pipeline, job("raw/nope.txt")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[tokio::test]
    async fn test_truncation_flag() {
        let mut h = Harness::new(vec![]);
        h.pipeline.settings.extract_char_limit = 5;
        h.put("raw/cv-1.txt", "abcdefgh").await;
        let outcome = run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();
        assert!(outcome.truncated);
        assert_eq!(h.text("text/cv-1.txt").await, "abcde");
    }

    #[tokio::test]
    async fn test_jd_file_is_extracted_best_effort() {
        let h = Harness::new(vec![]);
        h.put("raw/cv-1.txt", "Jane").await;
        h.put("raw-jd/cv-1.txt", "  Senior   Rust engineer  ").await;
        let mut j = job("raw/cv-1.txt");
        j.jd_input_key = Some("raw-jd/cv-1.txt".into());

        let outcome = run(&h.pipeline, j).await.unwrap();
        assert_eq!(outcome.jd_key.as_deref(), Some("jd/cv-1.txt"));
        assert_eq!(h.text("jd/cv-1.txt").await, "Senior Rust engineer");
        assert_eq!(
            h.queue.pending_payloads(Stage::Optimize)[0]["jdKey"],
            "jd/cv-1.txt"
        );
    }

    #[tokio::test]
    async fn test_missing_jd_file_degrades() {
        let h = Harness::new(vec![]);
        h.put("raw/cv-1.txt", "Jane").await;
        let mut j = job("raw/cv-1.txt");
        j.jd_input_key = Some("raw-jd/missing.pdf".into());

        let outcome = run(&h.pipeline, j).await.unwrap();
        assert_eq!(outcome.jd_key, None);
        let meta: serde_json::Value =
            serde_json::from_str(&h.text("meta/cv-1.extract.json").await).unwrap();
        assert!(meta["warnings"][0]
            .as_str()
            .unwrap()
            .starts_with("JD file extraction failed"));
    }

    #[tokio::test]
    async fn test_encrypted_pdf_writes_no_text() {
        let h = Harness::new(vec![]);
        h.put(
            "raw/cv-1.pdf",
            "%PDF-1.4\ntrailer\n<< /Root 1 0 R /Encrypt 2 0 R >>\n%%EOF",
        )
        .await;
        let mut j = job("raw/cv-1.pdf");
        j.mime_type = Some("application/pdf".into());

        let err = run(&h.pipeline, j).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
        assert!(err.to_string().to_lowercase().contains("encrypted"));
        assert!(!h.store.keys().contains(&"text/cv-1.txt".to_string()));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = Harness::new(vec![]);
        h.put("raw/cv-1.txt", "Jane Doe jane@example.com").await;
        run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();
        let first = h.store.snapshot();
        run(&h.pipeline, job("raw/cv-1.txt")).await.unwrap();
        assert_eq!(h.store.snapshot(), first);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

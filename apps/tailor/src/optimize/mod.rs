//! Optimize stage: résumé text (+ optional JD) → validated structured JSON.
//!
//! Flow: load text → JD analysis (best-effort) → resolve configuration →
//!       one generation call → parse (one repair call) → validate →
//!       metrics → persist → enqueue Template.
//!
//! The generator is treated as an unreliable oracle: every reply is parsed
//! and validated before anything is written under the label's keys.

pub mod jd_parser;
pub mod metrics;
pub mod schema;

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::extract::normalize::truncate_chars;
use crate::llm_client::prompts::JSON_REPAIR_SYSTEM;
use crate::llm_client::{strip_json_fences, ChatMessage, GenerationRequest, TextGenerator};
use crate::pipeline::{BestEffort, OptimizeJob, Pipeline, TemplateJob};
use crate::prompts::{MessageContext, PromptSource};
use crate::queue::enqueue_job;
use crate::storage::{keys, StorageError};
use jd_parser::{analyze_jd, JdAnalysis};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeOutcome {
    pub json_key: String,
    pub metrics_key: String,
    pub label: String,
    pub source: PromptSource,
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing with a single repair attempt
// ────────────────────────────────────────────────────────────────────────────

fn parse_reply(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_json_fences(raw))
}

/// Parses the generator's reply, asking it once to repair invalid JSON.
pub async fn parse_with_repair(
    llm: &dyn TextGenerator,
    model: &str,
    raw: &str,
) -> Result<Value, PipelineError> {
    let first_error = match parse_reply(raw) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    warn!("Generator reply is not valid JSON ({first_error}), attempting one repair");

    let repair = GenerationRequest {
        model: model.to_string(),
        temperature: 0.0,
        messages: vec![
            ChatMessage::system(JSON_REPAIR_SYSTEM),
            ChatMessage::user(raw),
        ],
        json_mode: true,
    };
    let repaired = llm
        .generate(&repair)
        .await
        .map_err(|e| PipelineError::Generation(format!("repair call failed: {e}")))?;

    parse_reply(&repaired).map_err(|e| {
        PipelineError::Validation(schema::ValidationReport::unparseable(format!(
            "after one repair attempt: {e}"
        )))
    })
}

// ────────────────────────────────────────────────────────────────────────────
// JD inputs
// ────────────────────────────────────────────────────────────────────────────

/// Inline JD text wins; otherwise the extracted JD file, if any.
async fn load_jd_text(
    pipeline: &Pipeline,
    job: &OptimizeJob,
    warnings: &mut Vec<String>,
) -> String {
    if let Some(text) = job.jd_text.as_deref().filter(|t| !t.trim().is_empty()) {
        return text.to_string();
    }
    let Some(jd_key) = job.jd_key.as_deref() else {
        return String::new();
    };
    let loaded = pipeline
        .store
        .get(jd_key)
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned());
    BestEffort::or_degrade(loaded, "JD text unavailable", String::new)
        .settle(&job.job_id, warnings)
}

async fn persist_json<T: Serialize>(
    pipeline: &Pipeline,
    key: &str,
    value: &T,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| {
        PipelineError::Storage(StorageError::Backend(format!("cannot encode {key}: {e}")))
    })?;
    pipeline
        .store
        .put(key, Bytes::from(body), keys::JSON_MIME)
        .await?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Stage
// ────────────────────────────────────────────────────────────────────────────

pub async fn run(pipeline: &Pipeline, job: OptimizeJob) -> Result<OptimizeOutcome, PipelineError> {
    let started = Instant::now();
    let settings = &pipeline.settings;
    keys::validate_segment(&job.job_id).map_err(|e| PipelineError::Input(e.to_string()))?;
    let job_id = job.job_id.as_str();
    let mut warnings = Vec::new();

    // Step 1: Résumé text
    let text = pipeline.store.get(&job.text_key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
            PipelineError::Input(format!("cannot read text {}: {e}", job.text_key))
        }
        other => PipelineError::Storage(other),
    })?;
    let text = String::from_utf8_lossy(&text);
    let text = truncate_chars(&text, settings.opt_text_char_limit);

    // Step 2: JD analysis (best-effort)
    let jd_raw = load_jd_text(pipeline, &job, &mut warnings).await;
    let jd = if jd_raw.trim().is_empty() {
        JdAnalysis::default()
    } else {
        let analysis = BestEffort::or_degrade(
            analyze_jd(pipeline.llm.as_ref(), &settings.jd_analyze_model, &jd_raw).await,
            "JD analysis failed",
            JdAnalysis::default,
        )
        .settle(job_id, &mut warnings);

        let jd_key = keys::jd_analysis(job_id);
        BestEffort::or_degrade(
            persist_json(pipeline, &jd_key, &analysis).await,
            "JD analysis not persisted",
            || (),
        )
        .settle(job_id, &mut warnings);
        analysis
    };

    // Step 3: Resolve configuration
    let requested = job
        .prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(&settings.default_prompt);
    let config = pipeline.prompts.resolve(Some(requested)).await;
    let label = keys::validate_segment(&config.label)
        .map_err(|_| PipelineError::Input(format!("invalid prompt label '{}'", config.label)))?
        .to_string();
    info!(
        job_id,
        label = %label,
        source = ?config.source,
        model = %config.model,
        "Optimize started"
    );

    // Step 4: One generation call
    let ctx = MessageContext {
        text,
        role: &job.role,
        company: &job.company,
        jd: &jd,
        jd_raw: &jd_raw,
        links: &job.links,
    };
    let request = GenerationRequest {
        model: config.model.clone(),
        temperature: config.temperature,
        messages: config.build_messages(&ctx),
        json_mode: config.json_mode,
    };
    let raw = pipeline
        .llm
        .generate(&request)
        .await
        .map_err(|e| PipelineError::Generation(e.to_string()))?;

    // Step 5: Parse (one repair) and validate
    let value = parse_with_repair(pipeline.llm.as_ref(), &config.model, &raw).await?;
    let document = schema::validate_resume(&value).map_err(PipelineError::Validation)?;

    // Step 6: Metrics
    let computed = metrics::compute(&document, &jd, &job.role);

    // Step 7: Persist
    let json_key = keys::structured(job_id, &label);
    let metrics_key = keys::metrics(job_id, &label);
    persist_json(pipeline, &json_key, &document).await?;
    persist_json(pipeline, &metrics_key, &computed).await?;

    // Step 8: Hand off to Template
    let next = TemplateJob {
        job_id: job_id.to_string(),
        json_key: json_key.clone(),
        role: job.role.clone(),
        company: job.company.clone(),
        want_pdf: job.want_pdf,
        prompt: Some(label.clone()),
        template_key: job.template_key.clone(),
    };
    enqueue_job(pipeline.queue.as_ref(), &next).await?;

    info!(
        job_id,
        json_key = %json_key,
        coverage_pct = computed.jd.coverage_pct,
        bullets = computed.bullets.bullets_total,
        degraded = warnings.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Optimize completed"
    );

    Ok(OptimizeOutcome {
        json_key,
        metrics_key,
        label,
        source: config.source,
    })
}

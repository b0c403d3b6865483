//! Status Aggregator: a read-side projection of which artifacts exist.
//!
//! Nothing is stored about job progress; a job is as far along as its most
//! advanced artifact (PDF → DOCX → JSON → TEXT).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::prompts::normalize_label;
use crate::storage::{keys, ArtifactStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Queued,
    Extracted,
    Optimized,
    Templated,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Raw,
    Text,
    Json,
    Docx,
    Pdf,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Raw,
        ArtifactKind::Text,
        ArtifactKind::Json,
        ArtifactKind::Docx,
        ArtifactKind::Pdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Raw => "raw",
            ArtifactKind::Text => "text",
            ArtifactKind::Json => "json",
            ArtifactKind::Docx => "docx",
            ArtifactKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown artifact kind '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub stage: JobStage,
    /// Only kinds that exist, each as a retrieval URL.
    pub artifacts: BTreeMap<ArtifactKind, String>,
}

/// Where a resolved artifact lives and how to serve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub key: String,
    pub content_type: String,
    pub filename: String,
}

impl ArtifactLocation {
    fn new(key: String) -> Self {
        let filename = key.rsplit('/').next().unwrap_or(&key).to_string();
        Self {
            content_type: keys::detect_mime(&key),
            filename,
            key,
        }
    }
}

async fn first_existing(
    store: &dyn ArtifactStore,
    candidates: impl IntoIterator<Item = String>,
) -> Result<Option<String>, StorageError> {
    for key in candidates {
        if store.exists(&key).await? {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

/// Candidate keys for a kind. For `json`, an explicit label is probed alone;
/// without one the legacy unlabelled key comes first, then `labels` in order,
/// then any other labelled result the store holds for the job.
async fn candidates(
    store: &dyn ArtifactStore,
    kind: ArtifactKind,
    job_id: &str,
    prompt: Option<&str>,
    labels: &[String],
) -> Result<Vec<String>, StorageError> {
    let probes = match kind {
        ArtifactKind::Raw => keys::RAW_EXTENSIONS
            .iter()
            .map(|ext| keys::raw(job_id, ext))
            .collect(),
        ArtifactKind::Text => vec![keys::text(job_id)],
        ArtifactKind::Json => match prompt.map(str::trim).filter(|p| !p.is_empty()) {
            Some(label) => vec![keys::structured(job_id, &normalize_label(Some(label)))],
            None => {
                let mut probes: Vec<String> = std::iter::once(keys::legacy_structured(job_id))
                    .chain(labels.iter().map(|l| keys::structured(job_id, l)))
                    .collect();
                for key in stored_labelled_results(store, job_id).await? {
                    if !probes.contains(&key) {
                        probes.push(key);
                    }
                }
                probes
            }
        },
        ArtifactKind::Docx => vec![keys::docx(job_id)],
        ArtifactKind::Pdf => vec![keys::pdf(job_id)],
    };
    Ok(probes)
}

/// `json/{jobId}.{label}.json` keys present in the store, whatever produced them.
async fn stored_labelled_results(
    store: &dyn ArtifactStore,
    job_id: &str,
) -> Result<Vec<String>, StorageError> {
    let prefix = keys::structured_prefix(job_id);
    Ok(store
        .list(&prefix)
        .await?
        .into_iter()
        .filter(|key| {
            key.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .is_some_and(|label| keys::validate_segment(label).is_ok())
        })
        .collect())
}

/// Finds the stored artifact of `kind` for a job, if any.
pub async fn resolve_artifact(
    store: &dyn ArtifactStore,
    job_id: &str,
    kind: ArtifactKind,
    prompt: Option<&str>,
    labels: &[String],
) -> Result<Option<ArtifactLocation>, StorageError> {
    keys::validate_segment(job_id)?;
    if let Some(label) = prompt {
        keys::validate_segment(label.trim())?;
    }
    let probes = candidates(store, kind, job_id, prompt, labels).await?;
    Ok(first_existing(store, probes).await?.map(ArtifactLocation::new))
}

fn stage_for(present: &BTreeMap<ArtifactKind, String>) -> JobStage {
    if present.contains_key(&ArtifactKind::Pdf) {
        JobStage::Done
    } else if present.contains_key(&ArtifactKind::Docx) {
        JobStage::Templated
    } else if present.contains_key(&ArtifactKind::Json) {
        JobStage::Optimized
    } else if present.contains_key(&ArtifactKind::Text) {
        JobStage::Extracted
    } else {
        JobStage::Queued
    }
}

pub fn artifact_url(base_url: &str, job_id: &str, kind: ArtifactKind) -> String {
    format!("{base_url}/api/v1/resumes/{job_id}/{kind}")
}

/// Derives a job's stage and artifact map from the store alone.
pub async fn compute_status(
    store: &dyn ArtifactStore,
    job_id: &str,
    labels: &[String],
    base_url: &str,
) -> Result<JobStatus, StorageError> {
    keys::validate_segment(job_id)?;
    let mut artifacts = BTreeMap::new();
    for kind in ArtifactKind::ALL {
        let probes = candidates(store, kind, job_id, None, labels).await?;
        if first_existing(store, probes).await?.is_some() {
            artifacts.insert(kind, artifact_url(base_url, job_id, kind));
        }
    }
    Ok(JobStatus {
        job_id: job_id.to_string(),
        stage: stage_for(&artifacts),
        artifacts,
    })
}

//! Queue payloads, one per stage. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::prompts::normalize_label;
use crate::queue::{Stage, StagePayload};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractJob {
    pub job_id: String,
    pub input_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub want_pdf: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_key: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_text: Option<String>,
    /// Passed through untouched; nothing fetches it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_input_key: Option<String>,
}

impl StagePayload for ExtractJob {
    const STAGE: Stage = Stage::Extract;

    fn dedup_key(&self) -> Option<String> {
        Some(self.job_id.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeJob {
    pub job_id: String,
    pub text_key: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub want_pdf: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_key: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jd_key: Option<String>,
}

impl StagePayload for OptimizeJob {
    const STAGE: Stage = Stage::Optimize;

    /// One run per job and label, so two labels on one job both proceed.
    /// Without a label the default is only known to the worker, so the job id
    /// alone is used.
    fn dedup_key(&self) -> Option<String> {
        match self.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(label) => Some(format!("{}.{}", self.job_id, normalize_label(Some(label)))),
            None => Some(self.job_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateJob {
    pub job_id: String,
    pub json_key: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub want_pdf: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_key: Option<String>,
}

impl StagePayload for TemplateJob {
    const STAGE: Stage = Stage::Template;

    fn dedup_key(&self) -> Option<String> {
        Some(self.json_key.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertJob {
    pub job_id: String,
    pub docx_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_key: Option<String>,
}

impl StagePayload for ConvertJob {
    const STAGE: Stage = Stage::Convert;

    fn dedup_key(&self) -> Option<String> {
        Some(format!(
            "{}:{}",
            self.docx_key,
            self.out_key.as_deref().unwrap_or("pdf")
        ))
    }
}

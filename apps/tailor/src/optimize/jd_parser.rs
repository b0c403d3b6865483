//! JD Parser: one structured-analysis call over a raw job description.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm_client::prompts::JD_ANALYSIS_SYSTEM;
use crate::llm_client::{strip_json_fences, ChatMessage, GenerationRequest, TextGenerator};

/// Structured view of a job description. Every field may be empty, and the
/// all-empty value stands for "no JD".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JdAnalysis {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub seniority: String,
    #[serde(default)]
    pub must: Vec<String>,
    #[serde(default)]
    pub nice: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub certs: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub anti_patterns: Vec<String>,
}

impl JdAnalysis {
    /// Reads whatever the generator returned, keeping well-typed fields and
    /// dropping the rest. A comma-separated string stands in for a list.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| -> String {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let list = |key: &str| -> Vec<String> {
            match value.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                Some(Value::String(s)) => s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            }
        };

        Self {
            title: text("title"),
            seniority: text("seniority"),
            must: list("must"),
            nice: list("nice"),
            skills: list("skills"),
            tools: list("tools"),
            certs: list("certs"),
            keywords: list("keywords"),
            anti_patterns: list("anti_patterns"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Compact summary handed to message builders.
    pub fn summary(&self) -> Value {
        json!({
            "title": self.title,
            "must": self.must,
            "nice": self.nice,
            "skills": self.skills,
            "tools": self.tools,
            "certs": self.certs,
            "keywords": self.keywords,
        })
    }
}

/// Runs the analysis call. Any failure is returned as a message for the caller
/// to log; the stage then continues with an empty analysis.
pub async fn analyze_jd(
    llm: &dyn TextGenerator,
    model: &str,
    jd_text: &str,
) -> Result<JdAnalysis, String> {
    if jd_text.trim().is_empty() {
        return Ok(JdAnalysis::default());
    }

    let request = GenerationRequest {
        model: model.to_string(),
        temperature: 0.0,
        messages: vec![
            ChatMessage::system(JD_ANALYSIS_SYSTEM),
            ChatMessage::user(jd_text),
        ],
        json_mode: true,
    };

    let raw = llm
        .generate(&request)
        .await
        .map_err(|e| format!("JD analysis call failed: {e}"))?;
    let value: Value = serde_json::from_str(strip_json_fences(&raw))
        .map_err(|e| format!("JD analysis returned invalid JSON: {e}"))?;
    if !value.is_object() {
        return Err("JD analysis did not return a JSON object".to_string());
    }
    Ok(JdAnalysis::from_value(&value))
}

//! Prompt Resolver: turns a configuration label into a runnable
//! [`TransformationConfig`].
//!
//! Lookup order: custom override store (exact label, refreshed every call,
//! last good copy cached for store outages) → built-in definitions → the
//! minimal fallback. A miss is logged, never an error.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, warn};

use crate::llm_client::prompts::RESUME_SCHEMA;
use crate::llm_client::ChatMessage;
use crate::models::prompt::CustomPrompt;
use crate::optimize::jd_parser::JdAnalysis;

pub mod builtin;
pub mod store;

pub use store::{PgPromptStore, PromptStore, PromptStoreError};

pub const DEFAULT_LABEL: &str = "v1";
pub const FALLBACK_LABEL: &str = "fallback";

/// How the request messages are assembled. Selected by data, never evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBuilder {
    /// Strict ATS alignment with the raw JD and a full JD summary.
    AtsAligned,
    /// Quantified, outcome-first bullets.
    NumbersFirst,
    /// JD must-haves drive the wording.
    JdDriven,
    Minimal,
    /// Custom instruction text as the system message, standard user block.
    Instruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSource {
    Custom,
    Builtin,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationConfig {
    pub label: String,
    pub model: String,
    pub temperature: f32,
    pub json_mode: bool,
    pub instruction_text: String,
    pub builder: MessageBuilder,
    pub source: PromptSource,
}

/// Inputs available to a message builder.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub text: &'a str,
    pub role: &'a str,
    pub company: &'a str,
    pub jd: &'a JdAnalysis,
    pub jd_raw: &'a str,
    pub links: &'a [String],
}

impl TransformationConfig {
    /// Instruction text with the output schema interpolated at `{schema}`.
    pub fn system_prompt(&self) -> String {
        self.instruction_text.replace("{schema}", RESUME_SCHEMA)
    }

    pub fn build_messages(&self, ctx: &MessageContext<'_>) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(builtin::user_message(self.builder, ctx)),
        ]
    }
}

/// Lower-cases and trims a requested label; blank means the default.
pub fn normalize_label(label: Option<&str>) -> String {
    match label.map(str::trim) {
        Some(l) if !l.is_empty() => l.to_ascii_lowercase(),
        _ => DEFAULT_LABEL.to_string(),
    }
}

/// Whether a label may be used as an artifact key segment.
pub fn is_valid_label(label: &str) -> bool {
    (1..=64).contains(&label.len())
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub struct PromptResolver {
    store: Option<Arc<dyn PromptStore>>,
    cache: RwLock<HashMap<String, CustomPrompt>>,
    default_model: String,
}

impl PromptResolver {
    pub fn new(store: Option<Arc<dyn PromptStore>>, default_model: impl Into<String>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Labels worth probing when a caller does not name one.
    pub fn known_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = builtin::LABELS.iter().map(|l| l.to_string()).collect();
        if let Ok(cache) = self.cache.read() {
            let mut custom: Vec<String> = cache
                .keys()
                .filter(|k| !labels.contains(k))
                .cloned()
                .collect();
            custom.sort();
            labels.extend(custom);
        }
        labels
    }

    pub async fn resolve(&self, requested: Option<&str>) -> TransformationConfig {
        let label = normalize_label(requested);

        if let Some(custom) = self.lookup_custom(&label).await {
            debug!(label = %label, "Resolved custom prompt configuration");
            return self.from_custom(custom);
        }

        if let Some(config) = builtin::definition(&label, &self.default_model) {
            return config;
        }

        warn!(label = %label, "Prompt configuration not found, using minimal fallback");
        builtin::fallback(&label, &self.default_model)
    }

    async fn lookup_custom(&self, label: &str) -> Option<CustomPrompt> {
        let store = self.store.as_ref()?;
        match store.get(label).await {
            Ok(Some(prompt)) => {
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(label.to_string(), prompt.clone());
                }
                Some(prompt)
            }
            Ok(None) => {
                if let Ok(mut cache) = self.cache.write() {
                    cache.remove(label);
                }
                None
            }
            Err(e) => {
                let cached = self.cache.read().ok().and_then(|c| c.get(label).cloned());
                warn!(
                    label = %label,
                    using_cached = cached.is_some(),
                    "Prompt store lookup failed: {e}"
                );
                cached
            }
        }
    }

    fn from_custom(&self, custom: CustomPrompt) -> TransformationConfig {
        TransformationConfig {
            model: custom
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.default_model.clone()),
            temperature: custom.temperature as f32,
            json_mode: custom.json_mode,
            instruction_text: custom.instruction_text,
            builder: MessageBuilder::Instruction,
            source: PromptSource::Custom,
            label: custom.label,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A custom transformation configuration row from `prompt_versions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomPrompt {
    pub label: String,
    pub instruction_text: String,
    pub model: Option<String>,
    pub temperature: f64,
    pub json_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::is_valid_label;
use crate::models::prompt::CustomPrompt;

#[derive(Debug, Error)]
pub enum PromptStoreError {
    #[error("invalid label '{0}': use 1-64 of A-Z a-z 0-9 . _ -")]
    InvalidLabel(String),

    #[error("temperature must be between 0 and 1, got {0}")]
    InvalidTemperature(f64),

    #[error("instruction text must not be empty")]
    EmptyInstruction,

    #[error("prompt store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fields supplied when creating or replacing a custom configuration.
#[derive(Debug, Clone)]
pub struct NewPrompt {
    pub label: String,
    pub instruction_text: String,
    pub model: Option<String>,
    pub temperature: f64,
    pub json_mode: bool,
}

impl NewPrompt {
    /// Lower-cases the label and rejects values that cannot be stored.
    pub fn validated(mut self) -> Result<Self, PromptStoreError> {
        self.label = self.label.trim().to_ascii_lowercase();
        if !is_valid_label(&self.label) {
            return Err(PromptStoreError::InvalidLabel(self.label));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(PromptStoreError::InvalidTemperature(self.temperature));
        }
        if self.instruction_text.trim().is_empty() {
            return Err(PromptStoreError::EmptyInstruction);
        }
        Ok(self)
    }
}

/// Override store for custom configurations, keyed by label.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn get(&self, label: &str) -> Result<Option<CustomPrompt>, PromptStoreError>;
    async fn list(&self) -> Result<Vec<CustomPrompt>, PromptStoreError>;
    async fn upsert(&self, prompt: NewPrompt) -> Result<CustomPrompt, PromptStoreError>;
    /// Returns whether a row was removed.
    async fn delete(&self, label: &str) -> Result<bool, PromptStoreError>;
}

pub struct PgPromptStore {
    pool: PgPool,
}

impl PgPromptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates `prompt_versions` if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), PromptStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prompt_versions (
                label            TEXT PRIMARY KEY,
                instruction_text TEXT NOT NULL,
                model            TEXT,
                temperature      DOUBLE PRECISION NOT NULL DEFAULT 0.2,
                json_mode        BOOLEAN NOT NULL DEFAULT TRUE,
                created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("prompt_versions table ready");
        Ok(())
    }
}

#[async_trait]
impl PromptStore for PgPromptStore {
    async fn get(&self, label: &str) -> Result<Option<CustomPrompt>, PromptStoreError> {
        Ok(
            sqlx::query_as::<_, CustomPrompt>("SELECT * FROM prompt_versions WHERE label = $1")
                .bind(label)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list(&self) -> Result<Vec<CustomPrompt>, PromptStoreError> {
        Ok(
            sqlx::query_as::<_, CustomPrompt>("SELECT * FROM prompt_versions ORDER BY label")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn upsert(&self, prompt: NewPrompt) -> Result<CustomPrompt, PromptStoreError> {
        let prompt = prompt.validated()?;
        let row = sqlx::query_as::<_, CustomPrompt>(
            r#"
            INSERT INTO prompt_versions (label, instruction_text, model, temperature, json_mode)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (label) DO UPDATE SET
                instruction_text = EXCLUDED.instruction_text,
                model            = EXCLUDED.model,
                temperature      = EXCLUDED.temperature,
                json_mode        = EXCLUDED.json_mode,
                updated_at       = NOW()
            RETURNING *
            "#,
        )
        .bind(&prompt.label)
        .bind(&prompt.instruction_text)
        .bind(&prompt.model)
        .bind(prompt.temperature)
        .bind(prompt.json_mode)
        .fetch_one(&self.pool)
        .await?;

        info!("Saved prompt configuration '{}'", row.label);
        Ok(row)
    }

    async fn delete(&self, label: &str) -> Result<bool, PromptStoreError> {
        let result = sqlx::query("DELETE FROM prompt_versions WHERE label = $1")
            .bind(label.trim().to_ascii_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub use memory::InMemoryPromptStore;

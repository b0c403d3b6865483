//! Wires the stage functions to the work queue.
//!
//! Each stage reads its inputs from the artifact store, writes its outputs,
//! and only then enqueues the next stage. Re-running a stage for the same job
//! overwrites the same keys, which is what makes redelivery safe.

pub mod jobs;
pub mod outcome;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use jobs::{ConvertJob, ExtractJob, OptimizeJob, TemplateJob};
pub use outcome::BestEffort;

use crate::config::PipelineSettings;
use crate::convert::{self, DocumentConverter};
use crate::errors::PipelineError;
use crate::extract;
use crate::llm_client::TextGenerator;
use crate::optimize;
use crate::prompts::PromptResolver;
use crate::queue::worker::StageHandler;
use crate::queue::{Stage, WorkQueue};
use crate::storage::ArtifactStore;
use crate::template;

/// Everything a stage needs, injected as trait objects.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn ArtifactStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub llm: Arc<dyn TextGenerator>,
    pub prompts: Arc<PromptResolver>,
    pub converter: Arc<dyn DocumentConverter>,
    pub settings: PipelineSettings,
}

fn decode<T: DeserializeOwned>(stage: Stage, payload: Value) -> Result<T, PipelineError> {
    serde_json::from_value(payload)
        .map_err(|e| PipelineError::Input(format!("malformed {stage} payload: {e}")))
}

#[async_trait]
impl StageHandler for Pipeline {
    async fn handle(&self, stage: Stage, payload: Value) -> Result<(), PipelineError> {
        match stage {
            Stage::Extract => {
                extract::run(self, decode(stage, payload)?).await?;
            }
            Stage::Optimize => {
                optimize::run(self, decode(stage, payload)?).await?;
            }
            Stage::Template => {
                template::run(self, decode(stage, payload)?).await?;
            }
            Stage::Convert => {
                convert::run(self, decode(stage, payload)?).await?;
            }
        }
        Ok(())
    }
}

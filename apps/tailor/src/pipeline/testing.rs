//! In-process fixtures shared by the stage tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;

use super::Pipeline;
use crate::config::PipelineSettings;
use crate::convert::{ConvertError, DocumentConverter};
use crate::llm_client::{GenerationRequest, LlmError, TextGenerator, DEFAULT_MODEL};
use crate::prompts::PromptResolver;
use crate::queue::InMemoryWorkQueue;
use crate::storage::{keys, ArtifactStore, InMemoryArtifactStore};
use crate::template::sample_template;

/// Replays canned replies in order and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyContent))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FakeOutput {
    /// `{stem}.pdf`, like soffice.
    #[default]
    Expected,
    OtherName,
    Nothing,
    Fail,
}

/// Stands in for soffice by writing a stub PDF.
#[derive(Default)]
pub struct FakeConverter {
    output: Mutex<FakeOutput>,
    calls: Mutex<usize>,
}

impl FakeConverter {
    pub fn set_output(&self, output: FakeOutput) {
        *self.output.lock().unwrap() = output;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<(), ConvertError> {
        *self.calls.lock().unwrap() += 1;
        let output = *self.output.lock().unwrap();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match output {
            FakeOutput::Expected => format!("{stem}.pdf"),
            FakeOutput::OtherName => "output.pdf".to_string(),
            FakeOutput::Nothing => return Ok(()),
            FakeOutput::Fail => {
                return Err(ConvertError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "source file could not be loaded".to_string(),
                })
            }
        };
        tokio::fs::write(out_dir.join(name), b"%PDF-1.4 fake").await?;
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryArtifactStore>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub llm: Arc<ScriptedGenerator>,
    pub converter: Arc<FakeConverter>,
    dir: TempDir,
}

impl Harness {
    /// A pipeline over in-memory backends with no template on the search path.
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryArtifactStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new(3));
        let llm = Arc::new(ScriptedGenerator::new(replies));
        let converter = Arc::new(FakeConverter::default());

        let settings = PipelineSettings {
            template_paths: Vec::new(),
            scratch_dir: dir.path().join("scratch"),
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline {
            store: store.clone(),
            queue: queue.clone(),
            llm: llm.clone(),
            prompts: Arc::new(PromptResolver::new(None, DEFAULT_MODEL)),
            converter: converter.clone(),
            settings,
        };

        Self {
            pipeline,
            store,
            queue,
            llm,
            converter,
            dir,
        }
    }

    /// Puts the sample template on the search path.
    pub async fn with_template(mut self) -> Self {
        let path = self.dir.path().join("resume.docx");
        tokio::fs::write(&path, sample_template().unwrap()).await.unwrap();
        self.pipeline.settings.template_paths = vec![path];
        self
    }

    pub async fn put(&self, key: &str, text: &str) {
        self.put_bytes(key, text.as_bytes().to_vec()).await;
    }

    pub async fn put_bytes(&self, key: &str, bytes: Vec<u8>) {
        self.store
            .put(key, Bytes::from(bytes), &keys::detect_mime(key))
            .await
            .unwrap();
    }

    pub async fn text(&self, key: &str) -> String {
        let bytes = self.store.get(key).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}

/// A reply that passes validation, with Rust and Node.js among the skills.
pub fn resume_reply() -> String {
    json!({
        "name": "Jane Doe",
        "contact": {"email": "jane@example.com", "phone": "+1 555 0100"},
        "summary": "Backend engineer building reliable services in Rust.",
        "experience": [{
            "title": "Senior Engineer",
            "company": "Initech",
            "dates": "2020 - 2024",
            "bullets": [
                "Cut p99 latency by 40% by rewriting the ingest path in Rust",
                "Led migration of 12 Node.js services to Kubernetes"
            ]
        }],
        "education": [{
            "degree": "BSc Computer Science",
            "school": "State University",
            "dates": "2012 - 2016"
        }],
        "skills": ["Rust", "Node.js", "PostgreSQL"]
    })
    .to_string()
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::llm_client::DEFAULT_MODEL;
use crate::prompts::DEFAULT_LABEL;
use crate::queue::{QueueNames, Stage};

/// Where artifacts live.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        /// Custom endpoint for MinIO and other S3-compatible stores.
        endpoint: Option<String>,
        region: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

/// Consumer pool size per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConcurrency {
    pub extract: usize,
    pub optimize: usize,
    pub template: usize,
    pub convert: usize,
}

impl Default for StageConcurrency {
    fn default() -> Self {
        Self {
            extract: 5,
            optimize: 2,
            template: 2,
            convert: 1,
        }
    }
}

impl StageConcurrency {
    pub fn for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Extract => self.extract,
            Stage::Optimize => self.optimize,
            Stage::Template => self.template,
            Stage::Convert => self.convert,
        }
    }
}

/// Knobs read by the stage handlers.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub extract_max_bytes: usize,
    pub extract_char_limit: usize,
    pub links_append: bool,
    pub links_max: usize,
    pub opt_text_char_limit: usize,
    /// Label used when a job names none.
    pub default_prompt: String,
    pub jd_analyze_model: String,
    /// Template candidates, tried in order.
    pub template_paths: Vec<PathBuf>,
    pub scratch_dir: PathBuf,
    pub soffice_bin: String,
    pub convert_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extract_max_bytes: 10 * 1024 * 1024,
            extract_char_limit: 25_000,
            links_append: true,
            links_max: 20,
            opt_text_char_limit: 20_000,
            default_prompt: DEFAULT_LABEL.to_string(),
            jd_analyze_model: DEFAULT_MODEL.to_string(),
            template_paths: template_search_paths(None),
            scratch_dir: std::env::temp_dir(),
            soffice_bin: "/usr/bin/soffice".to_string(),
            convert_timeout: Duration::from_secs(120),
        }
    }
}

/// `TEMPLATE_PATH` (when set) followed by the conventional locations.
pub fn template_search_paths(configured: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = configured.into_iter().collect();
    for candidate in [
        "data/templates/resume.docx",
        "/usr/src/app/data/templates/resume.docx",
        "templates/resume.docx",
    ] {
        let candidate = PathBuf::from(candidate);
        if !paths.contains(&candidate) {
            paths.push(candidate);
        }
    }
    paths
}

/// Application configuration loaded from environment variables.
///
/// Backend-specific values stay optional here and are demanded by the
/// `require_*` accessors only when the command actually needs them.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Prefix for artifact URLs in status responses.
    pub public_base_url: String,
    pub storage: StorageConfig,
    pub redis_url: Option<String>,
    pub queue_names: QueueNames,
    pub queue_max_attempts: u32,
    /// How long a delivery may stay in flight before another worker may take it.
    pub queue_lease: Duration,
    pub concurrency: StageConcurrency,
    pub database_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub llm_model: String,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let port: u16 = env_parse("PORT", 8080)?;
        let llm_model = optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let defaults = StageConcurrency::default();
        let pipeline_defaults = PipelineSettings::default();

        Ok(Config {
            port,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            public_base_url: optional_env("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            storage: storage_from_env()?,
            redis_url: optional_env("REDIS_URL"),
            queue_names: queue_names_from_env(),
            queue_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_lease: Duration::from_secs(env_parse("QUEUE_LEASE_SECS", 900u64)?),
            concurrency: StageConcurrency {
                extract: env_parse("EXTRACT_CONCURRENCY", defaults.extract)?,
                optimize: env_parse("OPTIMIZE_CONCURRENCY", defaults.optimize)?,
                template: env_parse("TEMPLATE_CONCURRENCY", defaults.template)?,
                convert: env_parse("CONVERT_CONCURRENCY", defaults.convert)?,
            },
            database_url: optional_env("DATABASE_URL"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            pipeline: PipelineSettings {
                extract_max_bytes: env_parse("EXTRACT_MAX_BYTES", pipeline_defaults.extract_max_bytes)?,
                extract_char_limit: env_parse(
                    "EXTRACT_CHAR_LIMIT",
                    pipeline_defaults.extract_char_limit,
                )?,
                links_append: parse_yes(optional_env("EXTRACT_LINKS_APPEND").as_deref(), true),
                links_max: env_parse("EXTRACT_LINKS_MAX", pipeline_defaults.links_max)?,
                opt_text_char_limit: env_parse(
                    "OPT_TEXT_CHAR_LIMIT",
                    pipeline_defaults.opt_text_char_limit,
                )?,
                default_prompt: optional_env("OPT_PROMPT")
                    .unwrap_or(pipeline_defaults.default_prompt),
                jd_analyze_model: optional_env("JD_ANALYZE_MODEL")
                    .unwrap_or_else(|| llm_model.clone()),
                template_paths: template_search_paths(optional_env("TEMPLATE_PATH").map(PathBuf::from)),
                scratch_dir: optional_env("SCRATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(pipeline_defaults.scratch_dir),
                soffice_bin: optional_env("SOFFICE_BIN").unwrap_or(pipeline_defaults.soffice_bin),
                convert_timeout: Duration::from_secs(env_parse("CONVERT_TIMEOUT_SECS", 120u64)?),
            },
            llm_model,
        })
    }

    pub fn require_redis_url(&self) -> Result<&str> {
        self.redis_url
            .as_deref()
            .context("Required environment variable 'REDIS_URL' is not set")
    }

    pub fn require_anthropic_key(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("Required environment variable 'ANTHROPIC_API_KEY' is not set")
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("Required environment variable 'DATABASE_URL' is not set")
    }

    /// Retrieval URL for a job's status.
    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}/api/v1/resumes/{job_id}", self.public_base_url)
    }
}

fn storage_from_env() -> Result<StorageConfig> {
    let backend = optional_env("STORAGE_BACKEND").unwrap_or_else(|| "local".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "local" => Ok(StorageConfig::Local {
            root: PathBuf::from(optional_env("LOCAL_DATA_DIR").unwrap_or_else(|| "./data".into())),
        }),
        "s3" | "minio" => Ok(StorageConfig::S3 {
            bucket: require_env("S3_BUCKET")?,
            endpoint: optional_env("S3_ENDPOINT"),
            region: optional_env("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
        }),
        other => bail!("STORAGE_BACKEND must be 'local' or 's3', got '{other}'"),
    }
}

fn queue_names_from_env() -> QueueNames {
    let defaults = QueueNames::default();
    QueueNames {
        extract: optional_env("QUEUE_EXTRACT").unwrap_or(defaults.extract),
        optimize: optional_env("QUEUE_OPTIMIZE").unwrap_or(defaults.optimize),
        template: optional_env("QUEUE_TEMPLATE").unwrap_or(defaults.template),
        convert: optional_env("QUEUE_CONVERT").unwrap_or(defaults.convert),
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Set and non-blank.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => parse_value(key, &raw),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}"))
}

/// `1`, `true`, `yes` and `on` (any case) are true; unset takes the default.
fn parse_yes(value: Option<&str>, default: bool) -> bool {
    match value {
        None => default,
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    }
}

//! Command-line surface: the HTTP server, the stage workers and the operator
//! commands that sit beside them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::pipeline::ExtractJob;
use crate::queue::{enqueue_job, EnqueueOutcome, Stage, WorkQueue};
use crate::storage::{keys, ArtifactStore};

#[derive(Debug, Parser)]
#[command(name = "tailor", version, about = "Résumé tailoring pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the read-only status and artifact API.
    Serve,
    /// Run stage consumers until Ctrl-C.
    Worker {
        /// Stages to consume; all of them when omitted.
        #[arg(long = "stage", value_enum)]
        stages: Vec<StageArg>,
    },
    /// Upload a résumé (and optional JD file) and enqueue extraction.
    Submit(SubmitArgs),
    /// Print the derived status of a job.
    Status { job_id: String },
    /// Manage custom prompt configurations.
    Prompts {
        #[command(subcommand)]
        action: PromptsCommand,
    },
    /// List dead-lettered messages for a stage.
    DeadLetters {
        #[arg(value_enum)]
        stage: StageArg,
    },
    Template {
        #[command(subcommand)]
        action: TemplateCommand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    Extract,
    Optimize,
    Template,
    Convert,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Extract => Stage::Extract,
            StageArg::Optimize => Stage::Optimize,
            StageArg::Template => Stage::Template,
            StageArg::Convert => Stage::Convert,
        }
    }
}

/// Requested stages, or every stage when none were named.
pub fn selected_stages(args: &[StageArg]) -> Vec<Stage> {
    if args.is_empty() {
        return Stage::ALL.to_vec();
    }
    let mut stages: Vec<Stage> = Vec::new();
    for stage in args.iter().copied().map(Stage::from) {
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    stages
}

#[derive(Debug, Clone, Default, Args)]
pub struct SubmitArgs {
    /// Résumé file (pdf, doc, docx or txt).
    #[arg(long)]
    pub file: PathBuf,
    /// Optional job-description file, extracted alongside the résumé.
    #[arg(long)]
    pub jd_file: Option<PathBuf>,
    /// Defaults to `{file-stem}-{unix-millis}`.
    #[arg(long)]
    pub job_id: Option<String>,
    #[arg(long, default_value = "")]
    pub role: String,
    #[arg(long, default_value = "")]
    pub company: String,
    /// Prompt label, e.g. v1, v2, vjd1.
    #[arg(long)]
    pub prompt: Option<String>,
    #[arg(long)]
    pub template_key: Option<String>,
    #[arg(long)]
    pub jd_text: Option<String>,
    #[arg(long)]
    pub jd_url: Option<String>,
    /// JSON array or comma/space separated URLs.
    #[arg(long)]
    pub links: Option<String>,
    /// Stop after the DOCX.
    #[arg(long)]
    pub no_pdf: bool,
}

#[derive(Debug, Subcommand)]
pub enum PromptsCommand {
    List,
    /// Create or replace a custom configuration.
    Put {
        label: String,
        /// File holding the system instruction text.
        #[arg(long)]
        instruction_file: PathBuf,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 0.2)]
        temperature: f64,
        #[arg(long)]
        no_json: bool,
    },
    Delete { label: String },
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// Write the sample DOCX template.
    Init {
        #[arg(long, default_value = "data/templates/resume.docx")]
        out: PathBuf,
    },
}

/// Accepts a JSON array or a comma/whitespace separated list.
pub fn parse_links(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
        return items.into_iter().filter(|s| !s.trim().is_empty()).collect();
    }
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn upload_extension(path: &Path) -> Result<String> {
    let ext = keys::extension(&path.to_string_lossy())
        .with_context(|| format!("{} has no file extension", path.display()))?;
    if !keys::RAW_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "Unsupported file type '.{ext}' for {}; expected one of {}",
            path.display(),
            keys::RAW_EXTENSIONS.join(", ")
        );
    }
    Ok(ext)
}

/// `{stem}-{millis}` with characters that cannot appear in a key replaced by `-`.
pub fn derive_job_id(file: &Path, unix_millis: u128) -> String {
    let stem: String = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        format!("resume-{unix_millis}")
    } else {
        format!("{stem}-{unix_millis}")
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub job_id: String,
    pub input_key: String,
    pub jd_input_key: Option<String>,
    pub deduplicated: bool,
}

async fn store_file(store: &dyn ArtifactStore, path: &Path, key: &str) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    store
        .put(key, Bytes::from(bytes), &keys::detect_mime(key))
        .await
        .with_context(|| format!("cannot store {key}"))?;
    Ok(())
}

/// Stores the raw files and enqueues the Extract payload.
pub async fn submit(
    store: &dyn ArtifactStore,
    queue: &dyn WorkQueue,
    args: &SubmitArgs,
    unix_millis: u128,
) -> Result<Submitted> {
    let ext = upload_extension(&args.file)?;
    let jd_ext = args.jd_file.as_deref().map(upload_extension).transpose()?;

    let job_id = match args.job_id.as_deref() {
        Some(id) => id.trim().to_string(),
        None => derive_job_id(&args.file, unix_millis),
    };
    keys::validate_segment(&job_id).context("invalid job id")?;

    let input_key = keys::raw(&job_id, &ext);
    store_file(store, &args.file, &input_key).await?;

    let jd_input_key = match (&args.jd_file, jd_ext) {
        (Some(path), Some(jd_ext)) => {
            let key = keys::raw_jd(&job_id, &jd_ext);
            store_file(store, path, &key).await?;
            Some(key)
        }
        _ => None,
    };

    let job = ExtractJob {
        job_id: job_id.clone(),
        input_key: input_key.clone(),
        mime_type: Some(keys::detect_mime(&input_key)),
        role: args.role.clone(),
        company: args.company.clone(),
        want_pdf: !args.no_pdf,
        prompt: non_blank(&args.prompt),
        template_key: non_blank(&args.template_key),
        links: parse_links(args.links.as_deref()),
        jd_text: args.jd_text.clone().filter(|t| !t.trim().is_empty()),
        jd_url: non_blank(&args.jd_url),
        jd_input_key: jd_input_key.clone(),
    };
    let outcome = enqueue_job(queue, &job)
        .await
        .context("cannot enqueue extract job")?;
    info!(job_id = %job_id, input_key = %input_key, "Submitted job");

    Ok(Submitted {
        job_id,
        input_key,
        jd_input_key,
        deduplicated: outcome == EnqueueOutcome::Deduplicated,
    })
}

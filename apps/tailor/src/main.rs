mod cli;
mod config;
mod convert;
mod db;
mod errors;
mod extract;
mod llm_client;
mod models;
mod ooxml;
mod optimize;
mod pipeline;
mod prompts;
mod queue;
mod routes;
mod state;
mod status;
mod storage;
mod template;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{selected_stages, Cli, Command, PromptsCommand, TemplateCommand};
use crate::config::{Config, StorageConfig};
use crate::convert::SofficeConverter;
use crate::llm_client::{LlmClient, TextGenerator};
use crate::pipeline::Pipeline;
use crate::prompts::store::NewPrompt;
use crate::prompts::{builtin, PromptResolver, PromptStore};
use crate::queue::worker::{subscribe, StageHandler};
use crate::queue::{RedisWorkQueue, Stage, WorkQueue};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{ArtifactStore, LocalArtifactStore, S3ArtifactStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Worker { stages } => run_workers(&config, &selected_stages(&stages)).await,
        Command::Submit(args) => {
            let store = build_store(&config).await?;
            let queue = build_queue(&config)?;
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system clock is before the Unix epoch")?
                .as_millis();
            let submitted = cli::submit(store.as_ref(), queue.as_ref(), &args, millis).await?;
            if submitted.deduplicated {
                warn!(job_id = %submitted.job_id, "An extract job for this id is already queued");
            }
            println!("{}", submitted.job_id);
            println!("{}", config.status_url(&submitted.job_id));
            Ok(())
        }
        Command::Status { job_id } => {
            let store = build_store(&config).await?;
            let prompts = build_prompts(&config).await?;
            let status = status::compute_status(
                store.as_ref(),
                &job_id,
                &prompts.known_labels(),
                &config.public_base_url,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Prompts { action } => manage_prompts(&config, action).await,
        Command::DeadLetters { stage } => {
            let queue = build_queue(&config)?;
            let dead = queue.dead_letters(stage.into()).await?;
            println!("{}", serde_json::to_string_pretty(&dead)?);
            Ok(())
        }
        Command::Template {
            action: TemplateCommand::Init { out },
        } => {
            let written = template::write_sample(&out).await?;
            println!("Wrote sample template ({written} bytes) to {}", out.display());
            Ok(())
        }
    }
}

async fn serve(config: &Config) -> Result<()> {
    info!("Starting tailor API v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState {
        store: build_store(config).await?,
        prompts: build_prompts(config).await?,
        public_base_url: config.public_base_url.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn run_workers(config: &Config, stages: &[Stage]) -> Result<()> {
    info!(?stages, "Starting tailor workers v{}", env!("CARGO_PKG_VERSION"));

    let store = build_store(config).await?;
    let queue = build_queue(config)?;
    let prompts = build_prompts(config).await?;

    // Only the optimize stage calls the generator.
    let api_key = if stages.contains(&Stage::Optimize) {
        config.require_anthropic_key()?.to_string()
    } else {
        config.anthropic_api_key.clone().unwrap_or_default()
    };
    let llm: Arc<dyn TextGenerator> = Arc::new(LlmClient::new(api_key)?);
    info!("LLM client initialized (model: {})", prompts.default_model());

    let settings = config.pipeline.clone();
    let converter = Arc::new(SofficeConverter::new(
        settings.soffice_bin.clone(),
        settings.convert_timeout,
    ));
    let handler: Arc<dyn StageHandler> = Arc::new(Pipeline {
        store,
        queue: queue.clone(),
        llm,
        prompts,
        converter,
        settings,
    });

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    for &stage in stages {
        let concurrency = config.concurrency.for_stage(stage);
        handles.extend(
            subscribe(
                queue.clone(),
                stage,
                concurrency,
                handler.clone(),
                shutdown.clone(),
            )
            .await
            .with_context(|| format!("cannot start {stage} consumers"))?,
        );
        info!(%stage, concurrency, queue = config.queue_names.name(stage), "Consumers running");
    }

    cancel_on_signal(shutdown).await;
    info!("Shutdown requested, waiting for in-flight jobs");
    futures::future::join_all(handles).await;
    info!("Workers stopped");
    Ok(())
}

async fn manage_prompts(config: &Config, action: PromptsCommand) -> Result<()> {
    let store = db::connect_prompt_store(config.require_database_url()?).await?;
    match action {
        PromptsCommand::List => {
            println!("built-in: {}", builtin::LABELS.join(", "));
            for prompt in store.list().await? {
                println!(
                    "{}\tmodel={}\ttemperature={}\tjson={}\tupdated={}",
                    prompt.label,
                    prompt.model.as_deref().unwrap_or("default"),
                    prompt.temperature,
                    prompt.json_mode,
                    prompt.updated_at.to_rfc3339()
                );
            }
        }
        PromptsCommand::Put {
            label,
            instruction_file,
            model,
            temperature,
            no_json,
        } => {
            let instruction_text = tokio::fs::read_to_string(&instruction_file)
                .await
                .with_context(|| format!("cannot read {}", instruction_file.display()))?;
            let saved = store
                .upsert(NewPrompt {
                    label,
                    instruction_text,
                    model,
                    temperature,
                    json_mode: !no_json,
                })
                .await?;
            println!("Saved '{}'", saved.label);
        }
        PromptsCommand::Delete { label } => {
            if store.delete(&label).await? {
                println!("Deleted '{label}'");
            } else {
                println!("No custom configuration named '{label}'");
            }
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, then cancels `token`.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
    token.cancel();
}

async fn build_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    match &config.storage {
        StorageConfig::Local { root } => {
            info!(root = %root.display(), "Using local artifact store");
            Ok(Arc::new(LocalArtifactStore::new(root.clone())))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
        } => {
            let credentials = Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "tailor-static",
            );
            let client = build_s3_client(credentials, region, endpoint.as_deref()).await;
            info!(bucket = %bucket, "S3 client initialized");
            Ok(Arc::new(S3ArtifactStore::new(client, bucket.clone())))
        }
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(
    credentials: Credentials,
    region: &str,
    endpoint: Option<&str>,
) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials);
    if let Some(endpoint) = endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    // MinIO serves buckets by path, not by virtual host.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint.is_some())
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

fn build_queue(config: &Config) -> Result<Arc<dyn WorkQueue>> {
    let client = redis::Client::open(config.require_redis_url()?)
        .context("invalid REDIS_URL")?;
    info!("Redis client initialized");
    Ok(Arc::new(
        RedisWorkQueue::new(client, config.queue_names.clone(), config.queue_max_attempts)
            .with_lease(config.queue_lease),
    ))
}

async fn build_prompts(config: &Config) -> Result<Arc<PromptResolver>> {
    let store = db::optional_prompt_store(config.database_url.as_deref())
        .await?
        .map(|store| store as Arc<dyn PromptStore>);
    Ok(Arc::new(PromptResolver::new(store, config.llm_model.clone())))
}

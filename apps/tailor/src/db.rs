use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::prompts::PgPromptStore;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("cannot connect to PostgreSQL")?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Connects the custom prompt store and creates its table if needed.
pub async fn connect_prompt_store(database_url: &str) -> Result<Arc<PgPromptStore>> {
    let store = PgPromptStore::new(create_pool(database_url).await?);
    store
        .ensure_schema()
        .await
        .context("cannot prepare prompt_versions table")?;
    Ok(Arc::new(store))
}

/// The override store when `DATABASE_URL` is set; `None` runs on built-ins only.
pub async fn optional_prompt_store(database_url: Option<&str>) -> Result<Option<Arc<PgPromptStore>>> {
    match database_url {
        Some(url) => Ok(Some(connect_prompt_store(url).await?)),
        None => {
            info!("DATABASE_URL not set, using built-in prompt configurations only");
            Ok(None)
        }
    }
}

use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::get_config,
};
use ingestion_engine::{run_worker_loop, IngestionEngine};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(
        common::utils::embedding::EmbeddingProvider::from_config(
            &config,
            Some(openai_client.clone()),
        )
        .await?,
    );
    tracing::info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Raw store is the read-only source of truth; the staging store only
    // exists when configured, which also decides the upload strategy ladder.
    let raw_store = StorageManager::from_kind(config.storage.clone(), &config.data_dir).await?;
    let staging_store = match &config.staging_dir {
        Some(dir) => Some(StorageManager::local(dir).await?),
        None => None,
    };

    tracing::info!(
        vector_index_enabled = config.vector_index_enabled(),
        staging_configured = staging_store.is_some(),
        "Ingestion engine collaborators wired"
    );

    let engine = Arc::new(IngestionEngine::new(
        db.clone(),
        openai_client,
        config,
        raw_store,
        staging_store,
        embedding_provider,
    )?);

    run_worker_loop(db, engine).await
}

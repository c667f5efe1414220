use std::sync::Arc;
use std::time::Duration;

use common::storage::db::SurrealDbClient;
use common::utils::authority::AuthorityScorer;
use common::utils::config::{get_config, EmbedderOptions};
use common::utils::embedding::{EmbeddingProvider, OpenAiEmbedder};
use ingestion_pipeline::jobs::EmbedderFactory;
use ingestion_pipeline::llm::segmenter::LlmSegmenter;
use ingestion_pipeline::llm::translator::OpenAiTranslator;
use ingestion_pipeline::{run_sync_worker, IngestionPipeline, JobWorker, SyncOptions};
use search_index::{MeiliClient, MeiliIndex, SearchIndex};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Worker-only process: assumes an already-initialized catalog and search
/// store; runs the job and sync loops.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::new(
        openai_client.clone(),
        config.embedder.clone(),
    ));

    let authority = match AuthorityScorer::load(&config.authority_config_path) {
        Ok(scorer) => Arc::new(scorer),
        Err(err) => {
            warn!(error = %err, "authority config unavailable; using neutral defaults");
            Arc::new(AuthorityScorer::from_config(Default::default()))
        }
    };

    let segmenter = Arc::new(LlmSegmenter::new(
        openai_client.clone(),
        &config.segmentation_model,
        Duration::from_secs(config.embedder.timeout_secs),
    ));
    let translator = Arc::new(OpenAiTranslator::new(
        openai_client.clone(),
        &config.translation_model,
        Duration::from_secs(config.embedder.timeout_secs),
    ));

    let search: Arc<dyn SearchIndex> = Arc::new(MeiliIndex::new(
        MeiliClient::new(&config.meilisearch_url, &config.meilisearch_api_key)?,
        config.search.clone(),
        config.embedder.dimensions as usize,
    ));

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        embedder,
        authority,
        Some(segmenter),
        config.chunker.clone(),
    ));

    let factory_client = openai_client.clone();
    let factory_timeout = config.embedder.timeout_secs;
    let factory_retries = config.embedder.max_retries;
    let embedder_factory: EmbedderFactory = Arc::new(move |model, dimensions| {
        Arc::new(OpenAiEmbedder::new(
            factory_client.clone(),
            EmbedderOptions {
                model: model.to_string(),
                dimensions,
                timeout_secs: factory_timeout,
                max_retries: factory_retries,
            },
        ))
    });

    let job_worker = JobWorker::new(
        Arc::clone(&db),
        pipeline,
        Some(translator),
        embedder_factory,
    );

    tokio::join!(
        job_worker.run(),
        run_sync_worker(Arc::clone(&db), search, SyncOptions::default()),
    );
    Ok(())
}

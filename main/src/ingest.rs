use std::sync::Arc;
use std::time::Duration;

use common::storage::db::SurrealDbClient;
use common::utils::authority::AuthorityScorer;
use common::utils::config::get_config;
use common::utils::embedding::{EmbeddingProvider, OpenAiEmbedder};
use ingestion_pipeline::llm::segmenter::LlmSegmenter;
use ingestion_pipeline::{IngestOptions, IngestionPipeline};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-shot ingestion of the files given as arguments. Prints one JSON
/// report per file; the sync worker ships the results later.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: ingest <file.md> [file.md ...]");
        std::process::exit(2);
    }

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
        openai_client,
        &config.segmentation_model,
        Duration::from_secs(config.embedder.timeout_secs),
    ));

    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        embedder,
        authority,
        Some(segmenter),
        config.chunker.clone(),
    );

    let mut failed = false;
    for path in paths {
        match pipeline.ingest_file(&path, IngestOptions::default()).await {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(err) => {
                failed = true;
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "source_path": path,
                        "error": { "kind": err.kind(), "message": err.to_string() }
                    })
                );
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

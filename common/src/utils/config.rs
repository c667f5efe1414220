use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Tuning for the paragraph chunker. Character based.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ChunkerOptions {
    #[serde(default = "default_max_chunk")]
    pub max_chunk: usize,
    #[serde(default = "default_min_chunk")]
    pub min_chunk: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_max_chunk() -> usize {
    1500
}

fn default_min_chunk() -> usize {
    100
}

fn default_overlap() -> usize {
    150
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            max_chunk: default_max_chunk(),
            min_chunk: default_min_chunk(),
            overlap: default_overlap(),
        }
    }
}

/// Embedding provider settings. The model tag is read-only after start;
/// changing it requires the embedding-migration job.
#[derive(Clone, Debug, Deserialize)]
pub struct EmbedderOptions {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_embedding_timeout_secs() -> u64 {
    60
}

fn default_embedding_max_retries() -> usize {
    3
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
        }
    }
}

/// Search-store tuning: where the authority rule sits in the ranking list
/// and how many paragraph rows go into one upload batch.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_ranking_authority_position")]
    pub ranking_authority_position: usize,
    #[serde(default = "default_search_batch_size")]
    pub batch_size: usize,
}

fn default_ranking_authority_position() -> usize {
    4
}

fn default_search_batch_size() -> usize {
    200
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            ranking_authority_position: default_ranking_authority_position(),
            batch_size: default_search_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub meilisearch_url: String,
    #[serde(default)]
    pub meilisearch_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub segmentation_model: String,
    #[serde(default = "default_chat_model")]
    pub translation_model: String,
    #[serde(default = "default_authority_config_path")]
    pub authority_config_path: String,
    #[serde(default)]
    pub chunker: ChunkerOptions,
    #[serde(default)]
    pub embedder: EmbedderOptions,
    #[serde(default)]
    pub search: SearchOptions,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_authority_config_path() -> String {
    "./authority.json".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_defaults_match_tuning() {
        let options = ChunkerOptions::default();
        assert_eq!(options.max_chunk, 1500);
        assert_eq!(options.min_chunk, 100);
        assert_eq!(options.overlap, 150);
    }

    #[test]
    fn search_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.ranking_authority_position, 4);
        assert!(options.batch_size > 0);
    }

    #[test]
    fn option_records_deserialize_with_partial_input() {
        let options: ChunkerOptions =
            serde_json::from_str(r#"{"max_chunk": 800}"#).expect("deserialize");
        assert_eq!(options.max_chunk, 800);
        assert_eq!(options.min_chunk, 100);
        assert_eq!(options.overlap, 150);
    }
}

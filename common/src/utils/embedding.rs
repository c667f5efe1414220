use std::time::Duration;

use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

use super::config::EmbedderOptions;
use crate::error::AppError;

/// Batched text-to-vector provider. A batch either all-succeeds or
/// all-fails; callers own caching.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts in one provider round trip.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    /// Tag of the model producing the vectors, stored per paragraph row.
    fn model_id(&self) -> &str;

    /// Fixed output dimension of the model.
    fn dimension(&self) -> usize;
}

/// Production provider over the OpenAI embeddings endpoint.
pub struct OpenAiEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    options: EmbedderOptions,
}

impl OpenAiEmbedder {
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        options: EmbedderOptions,
    ) -> Self {
        Self { client, options }
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.options.model)
            .dimensions(self.options.dimensions)
            .input(texts.to_vec())
            .build()
            .map_err(AppError::from)?;

        let deadline = Duration::from_secs(self.options.timeout_secs);
        let response = tokio::time::timeout(deadline, self.client.embeddings().create(request))
            .await
            .map_err(|_| {
                AppError::DeadlineExceeded(format!(
                    "embedding batch of {} texts exceeded {}s",
                    texts.len(),
                    self.options.timeout_secs
                ))
            })?
            .map_err(AppError::from)?;

        if response.data.len() != texts.len() {
            return Err(AppError::ProviderPermanent(format!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                response.data.len()
            )));
        }

        // The provider reports an index per vector; order by it rather than
        // trusting response order.
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for item in response.data {
            let slot = vectors
                .get_mut(item.index as usize)
                .ok_or_else(|| {
                    AppError::ProviderPermanent(format!(
                        "embedding index {} out of range",
                        item.index
                    ))
                })?;
            *slot = item.embedding;
        }

        let expected = self.options.dimensions as usize;
        for vector in &vectors {
            if vector.len() != expected {
                return Err(AppError::ProviderPermanent(format!(
                    "embedding dimension mismatch: expected {expected}, received {}",
                    vector.len()
                )));
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(self.options.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.request_batch(texts),
            |err: &AppError| {
                let retry = err.is_transient();
                if retry {
                    warn!(error = %err, "transient embedding failure; retrying");
                }
                retry
            },
        )
        .await?;

        debug!(
            batch = texts.len(),
            model = %self.options.model,
            "embedded batch"
        );
        Ok(result)
    }

    fn model_id(&self) -> &str {
        &self.options.model
    }

    fn dimension(&self) -> usize {
        self.options.dimensions as usize
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Deterministic embedder for tests: counts calls and derives each
    /// vector from the text bytes so cache behavior is observable.
    pub struct CountingEmbedder {
        pub calls: AtomicUsize,
        pub texts_embedded: AtomicUsize,
        dimension: usize,
        model: String,
    }

    impl CountingEmbedder {
        pub fn new(dimension: usize, model: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
                dimension,
                model: model.to_string(),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn text_count(&self) -> usize {
            self.texts_embedded.load(Ordering::SeqCst)
        }

        pub fn vector_for(&self, text: &str) -> Vec<f32> {
            let seed = text
                .bytes()
                .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
            (0..self.dimension)
                .map(|i| ((seed.wrapping_add(i as u32)) % 1000) as f32 / 1000.0)
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn model_id(&self) -> &str {
            &self.model
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn counting_embedder_is_deterministic() {
        let embedder = CountingEmbedder::new(4, "test-model");
        let a = embedder
            .embed_batch(&["hello".to_string()])
            .await
            .expect("embed");
        let b = embedder
            .embed_batch(&["hello".to_string()])
            .await
            .expect("embed");
        assert_eq!(a, b);
        assert_eq!(embedder.call_count(), 2);
        assert_eq!(a[0].len(), 4);
    }

    #[cfg(test)]
    #[tokio::test]
    async fn empty_batch_is_free() {
        let embedder = CountingEmbedder::new(4, "test-model");
        let out = embedder.embed_batch(&[]).await.expect("embed");
        assert!(out.is_empty());
        assert_eq!(embedder.call_count(), 0);
    }
}

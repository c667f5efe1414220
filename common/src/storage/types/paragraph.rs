use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;
use crate::utils::chunker::BlockType;
use crate::utils::hashing::short_hash;

/// A dense vector stored as contiguous little-endian f32 bytes. Replaced
/// atomically with its paragraph, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingBlob(pub Vec<u8>);

impl EmbeddingBlob {
    pub fn from_floats(vector: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Self(bytes)
    }

    pub fn to_floats(&self) -> Vec<f32> {
        self.0
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Number of f32 components in the blob.
    pub fn dimension(&self) -> usize {
        self.0.len() / 4
    }
}

stored_object!(Paragraph, "content", {
    document_id: String,
    paragraph_index: usize,
    text: String,
    content_hash: String,
    heading: Option<String>,
    blocktype: BlockType,
    embedding: Option<EmbeddingBlob>,
    embedding_model: Option<String>,
    synced: bool,
    marker_failed: bool
});

impl Paragraph {
    /// Row ids combine the document id with twelve hex characters of the
    /// normalized-text hash, so re-segmentation that preserves the words
    /// keeps the id.
    pub fn make_id(document_id: &str, text: &str) -> String {
        format!("{document_id}-{}", short_hash(text))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: &str,
        paragraph_index: usize,
        text: String,
        content_hash: String,
        heading: Option<String>,
        blocktype: BlockType,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Self::make_id(document_id, &text),
            created_at: now,
            updated_at: now,
            document_id: document_id.to_string(),
            paragraph_index,
            text,
            content_hash,
            heading,
            blocktype,
            embedding: None,
            embedding_model: None,
            synced: false,
            marker_failed: false,
        }
    }

    pub fn with_embedding(mut self, vector: &[f32], model: &str) -> Self {
        self.embedding = Some(EmbeddingBlob::from_floats(vector));
        self.embedding_model = Some(model.to_string());
        self
    }

    /// All live rows for a document, ordered by paragraph index.
    pub async fn for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query(
                "SELECT * FROM content WHERE document_id = $document_id ORDER BY paragraph_index ASC",
            )
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }

    /// Embedding cache lookup: vectors for rows of this document whose
    /// stored model matches the configured one. Keyed by content hash; rows
    /// failing either check are absent.
    pub async fn cached_embeddings(
        document_id: &str,
        model: &str,
        db: &SurrealDbClient,
    ) -> Result<HashMap<String, EmbeddingBlob>, AppError> {
        let rows = Self::for_document(document_id, db).await?;
        let mut cache = HashMap::new();
        for row in rows {
            let (Some(embedding), Some(row_model)) = (row.embedding, row.embedding_model) else {
                continue;
            };
            if row_model == model {
                cache.insert(row.content_hash, embedding);
            }
        }
        Ok(cache)
    }

    /// Delete every row for a document. Full-rewrite and reap paths only.
    pub async fn delete_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query("DELETE content WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Flag every row of a document for the sync worker.
    pub async fn mark_unsynced(document_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE content SET synced = false, updated_at = time::now() WHERE document_id = $document_id",
        )
        .bind(("document_id", document_id.to_string()))
        .await?
        .check()?;
        Ok(())
    }

    /// Flip rows to synced. Conditional on `updated_at` still carrying the
    /// value observed at ship time, so a concurrent re-ingestion between
    /// ship and flip leaves the row unsynced for the next pass.
    pub async fn mark_synced(
        rows: &[(String, chrono::DateTime<chrono::Utc>)],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        for (id, shipped_at) in rows {
            db.query(
                "UPDATE type::thing('content', $id) SET synced = true WHERE updated_at = $shipped_at",
            )
            .bind(("id", id.clone()))
            .bind(("shipped_at", surrealdb::sql::Datetime::from(*shipped_at)))
            .await?
            .check()?;
        }
        Ok(())
    }

    /// Swap in freshly migrated vectors, one transaction per call. Rows are
    /// flagged unsynced so the search store picks up the new embeddings.
    pub async fn set_embeddings(
        rows: &[(String, EmbeddingBlob)],
        model: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut query = db.client.query("BEGIN TRANSACTION;");
        for (i, (id, blob)) in rows.iter().enumerate() {
            query = query
                .query(format!(
                    "UPDATE type::thing('content', $id_{i}) SET embedding = $blob_{i}, \
                     embedding_model = $model, synced = false, updated_at = time::now();"
                ))
                .bind((format!("id_{i}"), id.clone()))
                .bind((format!("blob_{i}"), blob.clone()));
        }
        let response = query
            .query("COMMIT TRANSACTION;")
            .bind(("model", model.to_string()))
            .await?;
        response.check()?;
        Ok(())
    }

    /// Bounded batch of unsynced rows for the sync worker.
    pub async fn list_unsynced(limit: usize, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<Self> = db
            .query("SELECT * FROM content WHERE synced = false ORDER BY document_id, paragraph_index LIMIT $limit")
            .bind(("limit", limit))
            .await?
            .take(0)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::utils::hashing::content_hash;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn sample(document_id: &str, index: usize, text: &str) -> Paragraph {
        Paragraph::new(
            document_id,
            index,
            text.to_string(),
            content_hash(text, document_id),
            None,
            BlockType::Paragraph,
        )
    }

    #[test]
    fn blob_round_trips_vectors() {
        let vector = vec![0.25f32, -1.5, 3.125, 0.0];
        let blob = EmbeddingBlob::from_floats(&vector);
        assert_eq!(blob.0.len(), 16);
        assert_eq!(blob.to_floats(), vector);
        assert_eq!(blob.dimension(), 4);
    }

    #[test]
    fn blob_bytes_are_little_endian() {
        let blob = EmbeddingBlob::from_floats(&[1.0f32]);
        assert_eq!(blob.0, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn ids_are_stable_across_marker_changes() {
        let a = Paragraph::make_id("doc1", "Some words here. More words.");
        let b = Paragraph::make_id(
            "doc1",
            "⁅s1⁆Some words here.⁅/s1⁆ ⁅s2⁆More words.⁅/s2⁆",
        );
        assert_eq!(a, b);
        assert!(a.starts_with("doc1-"));
    }

    #[tokio::test]
    async fn for_document_orders_by_index() {
        let db = memory_db().await;
        for (index, text) in [(1usize, "second paragraph"), (0, "first paragraph")] {
            db.store_item(sample("doc1", index, text))
                .await
                .expect("store");
        }
        db.store_item(sample("doc2", 0, "other document"))
            .await
            .expect("store");

        let rows = Paragraph::for_document("doc1", &db).await.expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].paragraph_index, 0);
        assert_eq!(rows[1].paragraph_index, 1);
    }

    #[tokio::test]
    async fn cached_embeddings_filters_by_model() {
        let db = memory_db().await;
        let fresh = sample("doc1", 0, "fresh model row").with_embedding(&[0.1, 0.2], "model-b");
        let stale = sample("doc1", 1, "stale model row").with_embedding(&[0.3, 0.4], "model-a");
        let bare = sample("doc1", 2, "row without embedding");
        for row in [fresh.clone(), stale, bare] {
            db.store_item(row).await.expect("store");
        }

        let cache = Paragraph::cached_embeddings("doc1", "model-b", &db)
            .await
            .expect("cache lookup");
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&fresh.content_hash).map(EmbeddingBlob::to_floats),
            Some(vec![0.1, 0.2])
        );
    }

    #[tokio::test]
    async fn unsynced_listing_and_flip() {
        let db = memory_db().await;
        let row = sample("doc1", 0, "pending row");
        db.store_item(row.clone()).await.expect("store");

        let unsynced = Paragraph::list_unsynced(10, &db).await.expect("list");
        assert_eq!(unsynced.len(), 1);

        let shipped = vec![(row.id.clone(), unsynced[0].updated_at)];
        Paragraph::mark_synced(&shipped, &db).await.expect("flip");

        let after = Paragraph::list_unsynced(10, &db).await.expect("list");
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn stale_flip_is_ignored() {
        let db = memory_db().await;
        let row = sample("doc1", 0, "pending row");
        db.store_item(row.clone()).await.expect("store");

        // Row mutated after ship: the flip must not apply.
        Paragraph::mark_unsynced("doc1", &db).await.expect("touch");
        let stale = vec![(row.id.clone(), row.updated_at)];
        Paragraph::mark_synced(&stale, &db).await.expect("flip");

        let after = Paragraph::list_unsynced(10, &db).await.expect("list");
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn mark_unsynced_touches_whole_document() {
        let db = memory_db().await;
        let mut synced_row = sample("doc1", 0, "already shipped");
        synced_row.synced = true;
        db.store_item(synced_row).await.expect("store");

        Paragraph::mark_unsynced("doc1", &db).await.expect("mark");
        let unsynced = Paragraph::list_unsynced(10, &db).await.expect("list");
        assert_eq!(unsynced.len(), 1);
    }
}

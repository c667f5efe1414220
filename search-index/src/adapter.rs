use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};

use common::error::AppError;
use common::utils::config::SearchOptions;

use crate::client::MeiliClient;
use crate::documents::{SearchDocument, SearchParagraph};
use crate::settings::{document_settings, paragraph_settings};

pub const DOCUMENT_INDEX: &str = "documents";
pub const PARAGRAPH_INDEX: &str = "paragraphs";

/// Serialized-batch budget. The engine's documented payload cap is far
/// larger; staying an order of magnitude under it keeps retries cheap.
const PAYLOAD_BUDGET_BYTES: usize = 8 * 1024 * 1024;

/// The search store, as the core sees it. One production implementation;
/// tests substitute a recording double.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Idempotent configuration of both indexes. Recreates the paragraph
    /// index when the held vector dimension no longer matches.
    async fn ensure_indexes(&self) -> Result<(), AppError>;

    /// Replace a document's presence: its document row and the full
    /// paragraph row set, uploaded in bounded batches.
    async fn index_document(
        &self,
        doc: &SearchDocument,
        paragraphs: &[SearchParagraph],
    ) -> Result<(), AppError>;

    /// Remove the document row and every paragraph row of the document.
    async fn delete_document(&self, document_id: &str) -> Result<(), AppError>;

    /// Metadata-only partial update of the document row.
    async fn update_partial(&self, document_id: &str, fields: Value) -> Result<(), AppError>;
}

/// Production adapter over the engine's REST API.
pub struct MeiliIndex {
    client: MeiliClient,
    options: SearchOptions,
    dimensions: usize,
}

impl MeiliIndex {
    pub fn new(client: MeiliClient, options: SearchOptions, dimensions: usize) -> Self {
        Self {
            client,
            options,
            dimensions,
        }
    }

    async fn create_index(&self, uid: &str) -> Result<(), AppError> {
        let (status, body) = self
            .client
            .request(
                Method::POST,
                "/indexes",
                Some(&json!({ "uid": uid, "primaryKey": "id" })),
            )
            .await?;
        if !status.is_success() {
            return Err(AppError::SearchFailed(format!(
                "index create {uid} rejected with {status}: {body}"
            )));
        }
        if let Some(task_uid) = body.get("taskUid").and_then(Value::as_u64) {
            // An already-existing index surfaces as a failed task; benign.
            if let Err(err) = self.client.wait_for_task(task_uid).await {
                if !err.to_string().contains("index_already_exists") {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// The vector dimension the engine currently holds for the paragraph
    /// index, when an embedder is configured.
    async fn held_dimensions(&self) -> Result<Option<usize>, AppError> {
        let (status, body) = self
            .client
            .request(
                Method::GET,
                &format!("/indexes/{PARAGRAPH_INDEX}/settings"),
                None,
            )
            .await?;
        if !status.is_success() {
            return Ok(None);
        }
        Ok(body
            .pointer("/embedders/default/dimensions")
            .and_then(Value::as_u64)
            .map(|d| d as usize))
    }

    async fn drop_paragraph_index(&self) -> Result<(), AppError> {
        self.client
            .enqueue_and_wait(
                Method::DELETE,
                &format!("/indexes/{PARAGRAPH_INDEX}"),
                None,
            )
            .await
    }

    async fn delete_paragraphs_of(&self, document_id: &str) -> Result<(), AppError> {
        let filter = format!("document_id = '{}'", document_id.replace('\'', "\\'"));
        self.client
            .enqueue_and_wait(
                Method::POST,
                &format!("/indexes/{PARAGRAPH_INDEX}/documents/delete"),
                Some(&json!({ "filter": filter })),
            )
            .await
    }

    /// Upload paragraph rows in batches bounded by both row count and
    /// serialized size.
    async fn upload_paragraphs(&self, paragraphs: &[SearchParagraph]) -> Result<(), AppError> {
        let mut batch: Vec<Value> = Vec::new();
        let mut batch_bytes = 0usize;

        for row in paragraphs {
            let value = serde_json::to_value(row)?;
            let row_bytes = value.to_string().len();
            let would_overflow = !batch.is_empty()
                && (batch.len() >= self.options.batch_size
                    || batch_bytes + row_bytes > PAYLOAD_BUDGET_BYTES);
            if would_overflow {
                self.flush_batch(&mut batch).await?;
                batch_bytes = 0;
            }
            batch_bytes += row_bytes;
            batch.push(value);
        }
        if !batch.is_empty() {
            self.flush_batch(&mut batch).await?;
        }
        Ok(())
    }

    async fn flush_batch(&self, batch: &mut Vec<Value>) -> Result<(), AppError> {
        let rows = std::mem::take(batch);
        info!(rows = rows.len(), "uploading paragraph batch");
        self.client
            .enqueue_and_wait(
                Method::POST,
                &format!("/indexes/{PARAGRAPH_INDEX}/documents"),
                Some(&Value::Array(rows)),
            )
            .await
    }
}

#[async_trait]
impl SearchIndex for MeiliIndex {
    async fn ensure_indexes(&self) -> Result<(), AppError> {
        self.create_index(DOCUMENT_INDEX).await?;
        self.create_index(PARAGRAPH_INDEX).await?;

        if let Some(held) = self.held_dimensions().await? {
            if held != self.dimensions {
                warn!(
                    held,
                    configured = self.dimensions,
                    "vector dimension changed; dropping and recreating paragraph index"
                );
                self.drop_paragraph_index().await?;
                self.create_index(PARAGRAPH_INDEX).await?;
            }
        }

        self.client
            .enqueue_and_wait(
                Method::PATCH,
                &format!("/indexes/{PARAGRAPH_INDEX}/settings"),
                Some(&paragraph_settings(
                    self.options.ranking_authority_position,
                    self.dimensions,
                )),
            )
            .await?;
        self.client
            .enqueue_and_wait(
                Method::PATCH,
                &format!("/indexes/{DOCUMENT_INDEX}/settings"),
                Some(&document_settings(self.options.ranking_authority_position)),
            )
            .await?;
        Ok(())
    }

    async fn index_document(
        &self,
        doc: &SearchDocument,
        paragraphs: &[SearchParagraph],
    ) -> Result<(), AppError> {
        // Stale rows from dropped paragraphs go first; the uploads below
        // rebuild the full set.
        self.delete_paragraphs_of(&doc.id).await?;

        self.client
            .enqueue_and_wait(
                Method::POST,
                &format!("/indexes/{DOCUMENT_INDEX}/documents"),
                Some(&json!([doc])),
            )
            .await?;

        self.upload_paragraphs(paragraphs).await
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
        self.delete_paragraphs_of(document_id).await?;
        self.client
            .enqueue_and_wait(
                Method::DELETE,
                &format!("/indexes/{DOCUMENT_INDEX}/documents/{document_id}"),
                None,
            )
            .await
    }

    async fn update_partial(&self, document_id: &str, fields: Value) -> Result<(), AppError> {
        let mut row = fields;
        if let Some(map) = row.as_object_mut() {
            map.insert("id".to_string(), json!(document_id));
        }
        self.client
            .enqueue_and_wait(
                Method::PUT,
                &format!("/indexes/{DOCUMENT_INDEX}/documents"),
                Some(&json!([row])),
            )
            .await
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Everything a test needs to assert about adapter traffic.
    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        EnsureIndexes,
        IndexDocument {
            document_id: String,
            paragraph_ids: Vec<String>,
        },
        DeleteDocument(String),
        UpdatePartial {
            document_id: String,
            fields: Value,
        },
    }

    /// In-memory double of the search store: records every call and can be
    /// told to fail, for sync-worker backoff tests.
    #[derive(Default)]
    pub struct RecordingIndex {
        pub operations: Mutex<Vec<RecordedOp>>,
        pub fail_writes: AtomicBool,
    }

    impl RecordingIndex {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ops(&self) -> Vec<RecordedOp> {
            self.operations.lock().expect("operations lock").clone()
        }

        pub fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        fn record(&self, op: RecordedOp) -> Result<(), AppError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(AppError::SearchFailed("injected failure".to_string()));
            }
            self.operations.lock().expect("operations lock").push(op);
            Ok(())
        }
    }

    #[async_trait]
    impl SearchIndex for RecordingIndex {
        async fn ensure_indexes(&self) -> Result<(), AppError> {
            self.record(RecordedOp::EnsureIndexes)
        }

        async fn index_document(
            &self,
            doc: &SearchDocument,
            paragraphs: &[SearchParagraph],
        ) -> Result<(), AppError> {
            self.record(RecordedOp::IndexDocument {
                document_id: doc.id.clone(),
                paragraph_ids: paragraphs.iter().map(|p| p.id.clone()).collect(),
            })
        }

        async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
            self.record(RecordedOp::DeleteDocument(document_id.to_string()))
        }

        async fn update_partial(&self, document_id: &str, fields: Value) -> Result<(), AppError> {
            self.record(RecordedOp::UpdatePartial {
                document_id: document_id.to_string(),
                fields,
            })
        }
    }
}

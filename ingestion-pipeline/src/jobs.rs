use std::sync::Arc;

use chrono::Duration as StaleWindow;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::error::AppError;
use common::storage::catalog::{apply_changeset, ChangeSet, ParagraphUpdate};
use common::storage::db::SurrealDbClient;
use common::storage::types::document::Document;
use common::storage::types::job::{Job, JobStatus, JobType};
use common::storage::types::paragraph::{EmbeddingBlob, Paragraph};
use common::utils::embedding::EmbeddingProvider;
use common::utils::hashing::content_hash;
use common::utils::markers::{normalize_text, strip_markers};

use crate::llm::translator::ParagraphTranslator;
use crate::pipeline::{IngestOptions, IngestionPipeline};

/// Builds a provider for the model an embedding-migration job names.
pub type EmbedderFactory = Arc<dyn Fn(&str, u32) -> Arc<dyn EmbeddingProvider> + Send + Sync>;

/// A heartbeat older than this lets another worker reclaim the job.
const STALE_AFTER_SECS: i64 = 300;
const IDLE_BACKOFF: Duration = Duration::from_millis(500);
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct JobWorker {
    db: Arc<SurrealDbClient>,
    pipeline: Arc<IngestionPipeline>,
    translator: Option<Arc<dyn ParagraphTranslator>>,
    embedder_factory: EmbedderFactory,
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct TranslationParams {
    target_language: String,
}

#[derive(Debug, Deserialize)]
struct MigrationParams {
    model: String,
    dimensions: u32,
}

impl JobWorker {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pipeline: Arc<IngestionPipeline>,
        translator: Option<Arc<dyn ParagraphTranslator>>,
        embedder_factory: EmbedderFactory,
    ) -> Self {
        Self {
            db,
            pipeline,
            translator,
            embedder_factory,
            worker_id: format!("job-worker-{}", Uuid::new_v4()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The long-running loop: claim, process, settle, back off when idle.
    pub async fn run(&self) {
        info!(worker_id = %self.worker_id, "job worker started");
        loop {
            match Job::claim_next(
                &self.worker_id,
                StaleWindow::seconds(STALE_AFTER_SECS),
                &self.db,
            )
            .await
            {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => sleep(IDLE_BACKOFF).await,
                Err(err) => {
                    error!(worker_id = %self.worker_id, error = %err, "failed to claim job");
                    sleep(CLAIM_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run one claimed job to a terminal status.
    pub async fn process(&self, job: Job) {
        let job_id = job.id.clone();
        info!(worker_id = %self.worker_id, %job_id, job_type = ?job.job_type, "claimed job");

        let outcome = match job.job_type {
            JobType::Translation => self.run_translation(&job).await,
            JobType::Resegmentation => self.run_resegmentation(&job).await,
            JobType::EmbeddingMigration => self.run_embedding_migration(&job).await,
        };

        let settle = match outcome {
            Ok(()) => Job::complete(&job_id, JobStatus::Succeeded, None, &self.db).await,
            Err(AppError::Cancelled) => {
                info!(%job_id, "job cancelled cooperatively");
                Job::complete(&job_id, JobStatus::Cancelled, None, &self.db).await
            }
            Err(err) => {
                warn!(%job_id, error = %err, kind = err.kind(), "job failed");
                Job::complete(
                    &job_id,
                    JobStatus::Failed,
                    Some(format!("{}: {err}", err.kind())),
                    &self.db,
                )
                .await
            }
        };
        if let Err(err) = settle {
            error!(%job_id, error = %err, "failed to settle job status");
        }
    }

    async fn check_cancel(&self, job_id: &str) -> Result<(), AppError> {
        if Job::is_cancel_requested(job_id, &self.db).await? {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// The job's target document, or `target_missing` if it was deleted out
    /// from under the job.
    async fn target_document(&self, job: &Job) -> Result<Document, AppError> {
        let document_id = job
            .document_id
            .as_deref()
            .ok_or_else(|| AppError::InputInvalid("job carries no document_id".into()))?;
        let doc: Option<Document> = self.db.get_item(document_id).await?;
        doc.filter(|d| !d.is_deleted())
            .ok_or_else(|| AppError::NotFound("target_missing".into()))
    }

    /// Mass translation: every paragraph through the translator, the result
    /// assembled into a sibling document in the target language and pushed
    /// through the normal ingestion path.
    async fn run_translation(&self, job: &Job) -> Result<(), AppError> {
        let params: TranslationParams = serde_json::from_value(job.params.clone())
            .map_err(|e| AppError::InputInvalid(format!("translation params: {e}")))?;
        let translator = self
            .translator
            .as_ref()
            .ok_or_else(|| AppError::InternalError("no translator configured".into()))?;

        let doc = self.target_document(job).await?;
        let rows = Paragraph::for_document(&doc.id, &self.db).await?;
        let total = rows.len();

        let mut translated: Vec<String> = Vec::with_capacity(total);
        for (done, row) in rows.iter().enumerate() {
            self.check_cancel(&job.id).await?;
            let text = normalize_text(&row.text);
            translated.push(translator.translate(&text, &params.target_language).await?);
            Job::report_progress(&job.id, done + 1, total, &self.db).await?;
        }

        let target_language = params.target_language.trim().to_lowercase();
        let target_id = format!("{}-{}", doc.id, target_language);
        let source = assemble_translated_source(&doc, &target_id, &target_language, &translated);
        let source_path = format!("{}#{}", doc.source_path, target_language);

        let report = self
            .pipeline
            .ingest_source(
                &source_path,
                source.as_bytes(),
                IngestOptions {
                    language_override: Some(target_language.clone()),
                    ..IngestOptions::default()
                },
            )
            .await?;
        info!(
            source_document = %doc.id,
            translated_document = %report.document_id,
            paragraphs = report.paragraph_count,
            "translation ingested"
        );
        Ok(())
    }

    /// Re-run the segmenter over a document's rows. Words never change, so
    /// row ids and embeddings survive; only text, hashes and the sync flag
    /// move.
    async fn run_resegmentation(&self, job: &Job) -> Result<(), AppError> {
        let doc = self.target_document(job).await?;
        let rows = Paragraph::for_document(&doc.id, &self.db).await?;
        let total = rows.len();

        let mut updates: Vec<ParagraphUpdate> = Vec::new();
        for (done, row) in rows.iter().enumerate() {
            self.check_cancel(&job.id).await?;
            let plain = strip_markers(&row.text);
            let (marked, marker_failed) = self.pipeline.segment(plain, doc.is_rtl).await?;
            if marker_failed {
                warn!(paragraph = %row.id, "re-segmentation rejected; row left as-is");
            } else if marked != row.text {
                updates.push(ParagraphUpdate {
                    id: row.id.clone(),
                    paragraph_index: row.paragraph_index,
                    text: marked.clone(),
                    content_hash: content_hash(&marked, &doc.id),
                    heading: row.heading.clone(),
                    blocktype: row.blocktype,
                });
            }
            Job::report_progress(&job.id, done + 1, total, &self.db).await?;
        }

        let rewritten = updates.len();
        apply_changeset(
            &self.db,
            &ChangeSet {
                deletes: Vec::new(),
                updates,
                inserts: Vec::new(),
            },
        )
        .await?;
        info!(document_id = %doc.id, rewritten, "re-segmentation finished");
        Ok(())
    }

    /// One-shot migration onto a new embedding model: generate per
    /// document, then swap vectors transactionally and leave the rows for
    /// the sync worker.
    async fn run_embedding_migration(&self, job: &Job) -> Result<(), AppError> {
        let params: MigrationParams = serde_json::from_value(job.params.clone())
            .map_err(|e| AppError::InputInvalid(format!("migration params: {e}")))?;
        let embedder = (self.embedder_factory)(&params.model, params.dimensions);

        let documents: Vec<Document> = match &job.document_id {
            Some(_) => vec![self.target_document(job).await?],
            None => {
                let all: Vec<Document> = self.db.get_all_stored_items().await?;
                all.into_iter().filter(|d| !d.is_deleted()).collect()
            }
        };

        let mut per_document: Vec<(Document, Vec<Paragraph>)> = Vec::new();
        let mut total = 0usize;
        for doc in documents {
            let rows = Paragraph::for_document(&doc.id, &self.db).await?;
            total += rows.len();
            per_document.push((doc, rows));
        }

        let mut done = 0usize;
        for (doc, rows) in per_document {
            if rows.is_empty() {
                continue;
            }
            self.check_cancel(&job.id).await?;

            let texts: Vec<String> = rows.iter().map(|r| normalize_text(&r.text)).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            let swaps: Vec<(String, EmbeddingBlob)> = rows
                .iter()
                .zip(vectors.iter())
                .map(|(row, vector)| (row.id.clone(), EmbeddingBlob::from_floats(vector)))
                .collect();
            Paragraph::set_embeddings(&swaps, embedder.model_id(), &self.db).await?;

            done += rows.len();
            Job::report_progress(&job.id, done, total, &self.db).await?;
            info!(document_id = %doc.id, migrated = rows.len(), "document re-embedded");
        }
        Ok(())
    }
}

/// Rebuild a markdown source for a translated document. The explicit id
/// keeps translations stable across re-runs of the job.
fn assemble_translated_source(
    doc: &Document,
    target_id: &str,
    target_language: &str,
    paragraphs: &[String],
) -> String {
    let mut source = String::new();
    source.push_str("---\n");
    source.push_str(&format!("id: {target_id}\n"));
    source.push_str(&format!("title: {}\n", doc.title));
    source.push_str(&format!("author: {}\n", doc.author));
    if !doc.religion.is_empty() {
        source.push_str(&format!("religion: {}\n", doc.religion));
    }
    if !doc.collection.is_empty() {
        source.push_str(&format!("collection: {}\n", doc.collection));
    }
    source.push_str(&format!("language: {target_language}\n"));
    if let Some(year) = doc.year {
        source.push_str(&format!("year: {year}\n"));
    }
    source.push_str("---\n");
    source.push_str(&paragraphs.join("\n\n"));
    source
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::storage::types::job::JobType;
    use common::utils::authority::{AuthorityConfig, AuthorityScorer};
    use common::utils::chunker::BlockType;
    use common::utils::config::ChunkerOptions;
    use common::utils::embedding::testing::CountingEmbedder;

    use super::*;

    struct EchoTranslator;

    #[async_trait]
    impl ParagraphTranslator for EchoTranslator {
        async fn translate(&self, text: &str, target_language: &str) -> Result<String, AppError> {
            Ok(format!("[{target_language}] {text}"))
        }
    }

    async fn memory_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        )
    }

    fn worker(db: Arc<SurrealDbClient>, embedder: Arc<CountingEmbedder>) -> JobWorker {
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&db),
            embedder,
            Arc::new(AuthorityScorer::from_config(AuthorityConfig::default())),
            None,
            ChunkerOptions {
                max_chunk: 1500,
                min_chunk: 4,
                overlap: 50,
            },
        ));
        let factory: EmbedderFactory =
            Arc::new(|model, dimensions| Arc::new(CountingEmbedder::new(dimensions as usize, model)));
        JobWorker::new(db, pipeline, Some(Arc::new(EchoTranslator)), factory)
    }

    async fn seed_document(db: &SurrealDbClient, id: &str) -> Document {
        let now = chrono::Utc::now();
        let doc = Document {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            title: "Seeded".to_string(),
            author: "Author".to_string(),
            religion: "bahai".to_string(),
            collection: "core".to_string(),
            language: "en".to_string(),
            is_rtl: false,
            year: None,
            description: String::new(),
            authority: 7,
            paragraph_count: 2,
            source_path: format!("library/{id}.md"),
            file_hash: "fh".to_string(),
            body_hash: "bh".to_string(),
            deleted_at: None,
        };
        doc.clone().upsert(db).await.expect("seed doc");
        for (index, text) in [(0usize, "First paragraph here."), (1, "Second paragraph here.")] {
            let row = Paragraph::new(
                id,
                index,
                text.to_string(),
                content_hash(text, id),
                None,
                BlockType::Paragraph,
            )
            .with_embedding(&[0.1, 0.2, 0.3, 0.4], "old-model");
            db.store_item(row).await.expect("seed row");
        }
        doc
    }

    #[tokio::test]
    async fn translation_job_creates_sibling_document() {
        let db = memory_db().await;
        let embedder = Arc::new(CountingEmbedder::new(4, "test-model"));
        let worker = worker(Arc::clone(&db), Arc::clone(&embedder));
        seed_document(&db, "doc1").await;

        let job_id = Job::enqueue(
            JobType::Translation,
            serde_json::json!({"target_language": "es"}),
            0,
            Some("doc1".to_string()),
            &db,
        )
        .await
        .expect("enqueue");
        let job = Job::claim_next(worker.worker_id(), StaleWindow::seconds(60), &db)
            .await
            .expect("claim")
            .expect("claimed");
        worker.process(job).await;

        let settled: Option<Job> = db.get_item(&job_id).await.expect("get job");
        let settled = settled.expect("job exists");
        assert_eq!(settled.status, JobStatus::Succeeded);
        assert_eq!(settled.progress_done, 2);

        let sibling: Option<Document> = db.get_item("doc1-es").await.expect("get doc");
        let sibling = sibling.expect("translated document exists");
        assert_eq!(sibling.language, "es");
        assert_eq!(sibling.paragraph_count, 2);

        let rows = Paragraph::for_document("doc1-es", &db).await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(normalize_text(&rows[0].text).starts_with("[es] First paragraph"));
    }

    #[tokio::test]
    async fn translation_of_missing_target_fails() {
        let db = memory_db().await;
        let embedder = Arc::new(CountingEmbedder::new(4, "test-model"));
        let worker = worker(Arc::clone(&db), embedder);

        let job_id = Job::enqueue(
            JobType::Translation,
            serde_json::json!({"target_language": "es"}),
            0,
            Some("ghost".to_string()),
            &db,
        )
        .await
        .expect("enqueue");
        let job = Job::claim_next(worker.worker_id(), StaleWindow::seconds(60), &db)
            .await
            .expect("claim")
            .expect("claimed");
        worker.process(job).await;

        let settled: Option<Job> = db.get_item(&job_id).await.expect("get job");
        let settled = settled.expect("job exists");
        assert_eq!(settled.status, JobStatus::Failed);
        assert!(settled.error.expect("error").contains("target_missing"));
    }

    #[tokio::test]
    async fn cancelled_job_finishes_cancelled() {
        let db = memory_db().await;
        let embedder = Arc::new(CountingEmbedder::new(4, "test-model"));
        let worker = worker(Arc::clone(&db), embedder);
        seed_document(&db, "doc1").await;

        let job_id = Job::enqueue(
            JobType::Translation,
            serde_json::json!({"target_language": "es"}),
            0,
            Some("doc1".to_string()),
            &db,
        )
        .await
        .expect("enqueue");
        Job::request_cancel(&job_id, &db).await.expect("cancel");

        let job = Job::claim_next(worker.worker_id(), StaleWindow::seconds(60), &db)
            .await
            .expect("claim")
            .expect("claimed");
        worker.process(job).await;

        let settled: Option<Job> = db.get_item(&job_id).await.expect("get job");
        assert_eq!(settled.expect("job").status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn resegmentation_marks_rows_in_place() {
        let db = memory_db().await;
        let embedder = Arc::new(CountingEmbedder::new(4, "test-model"));
        let worker = worker(Arc::clone(&db), Arc::clone(&embedder));
        seed_document(&db, "doc1").await;

        let job_id = Job::enqueue(
            JobType::Resegmentation,
            serde_json::json!({}),
            0,
            Some("doc1".to_string()),
            &db,
        )
        .await
        .expect("enqueue");
        let job = Job::claim_next(worker.worker_id(), StaleWindow::seconds(60), &db)
            .await
            .expect("claim")
            .expect("claimed");
        worker.process(job).await;

        let settled: Option<Job> = db.get_item(&job_id).await.expect("get job");
        assert_eq!(settled.expect("job").status, JobStatus::Succeeded);

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        for row in &rows {
            assert!(row.text.starts_with("⁅s1⁆"), "row should carry markers: {}", row.text);
            // Embedding survives the rewrite untouched.
            assert_eq!(row.embedding_model.as_deref(), Some("old-model"));
            assert!(!row.synced);
        }
        // No embedding calls: words did not change.
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn embedding_migration_swaps_models() {
        let db = memory_db().await;
        let embedder = Arc::new(CountingEmbedder::new(4, "test-model"));
        let worker = worker(Arc::clone(&db), embedder);
        seed_document(&db, "doc1").await;

        let job_id = Job::enqueue(
            JobType::EmbeddingMigration,
            serde_json::json!({"model": "next-model", "dimensions": 8}),
            0,
            None,
            &db,
        )
        .await
        .expect("enqueue");
        let job = Job::claim_next(worker.worker_id(), StaleWindow::seconds(60), &db)
            .await
            .expect("claim")
            .expect("claimed");
        worker.process(job).await;

        let settled: Option<Job> = db.get_item(&job_id).await.expect("get job");
        let settled = settled.expect("job exists");
        assert_eq!(settled.status, JobStatus::Succeeded);
        assert_eq!(settled.progress_done, 2);
        assert_eq!(settled.progress_total, 2);

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        for row in &rows {
            assert_eq!(row.embedding_model.as_deref(), Some("next-model"));
            let blob = row.embedding.as_ref().expect("embedding present");
            assert_eq!(blob.dimension(), 8);
            assert!(!row.synced);
        }
    }
}

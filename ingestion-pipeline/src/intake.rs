use tracing::info;

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::document::Document;
use common::storage::types::ingest_request::{
    IngestRecommendation, IngestRequest, IngestRequestStatus, IngestSource, SourceAnalysis,
};
use common::utils::chunker::chunk;
use common::utils::config::ChunkerOptions;
use common::utils::frontmatter::split_frontmatter;
use common::utils::hashing::file_hash;
use common::utils::language::detect;

use crate::pipeline::{IngestOptions, IngestReport, IngestionPipeline};

/// Fetch the raw bytes behind a source and the path it will be ingested
/// under.
async fn load_source(source: &IngestSource) -> Result<(String, Vec<u8>), AppError> {
    match source {
        IngestSource::File { path } => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| AppError::InputInvalid(format!("unreadable file {path}: {e}")))?;
            Ok((path.clone(), bytes))
        }
        IngestSource::Inline { title, text } => {
            Ok((format!("inline:{title}"), text.clone().into_bytes()))
        }
        IngestSource::Url { url } => {
            let body = reqwest::get(url).await?.error_for_status()?.text().await?;
            Ok((format!("url:{url}"), body.into_bytes()))
        }
    }
}

/// Deterministic pre-ingestion analysis: language, size, prospective chunk
/// count, duplicate detection, and a recommendation an operator can act on.
pub async fn analyze_source(
    source: &IngestSource,
    chunker: &ChunkerOptions,
    db: &SurrealDbClient,
) -> Result<(SourceAnalysis, IngestRecommendation), AppError> {
    let (_, bytes) = load_source(source).await?;

    let mut analysis = SourceAnalysis::default();
    let Ok(input) = std::str::from_utf8(&bytes) else {
        analysis.notes.push("source is not valid UTF-8".to_string());
        return Ok((analysis, IngestRecommendation::Reject));
    };

    let (metadata, body) = split_frontmatter(input);
    let detection = detect(body);
    analysis.language = detection.lang.to_string();
    analysis.is_rtl = detection.is_rtl;
    analysis.char_count = body.chars().count();
    analysis.estimated_paragraphs = chunk(body, chunker).len();
    analysis.duplicate_of = Document::find_by_file_hash(&file_hash(&bytes), db)
        .await?
        .map(|doc| doc.id);

    if body.trim().is_empty() || analysis.estimated_paragraphs == 0 {
        analysis.notes.push("no ingestible paragraphs".to_string());
        return Ok((analysis, IngestRecommendation::Reject));
    }

    let mut recommendation = IngestRecommendation::Approve;
    if let Some(duplicate) = &analysis.duplicate_of {
        analysis
            .notes
            .push(format!("byte-identical to document {duplicate}"));
        recommendation = IngestRecommendation::Review;
    }
    if !metadata.contains_key("title") {
        analysis.notes.push("no title in frontmatter".to_string());
        recommendation = IngestRecommendation::Review;
    }
    if !metadata.contains_key("author") {
        analysis.notes.push("no author in frontmatter".to_string());
        recommendation = IngestRecommendation::Review;
    }

    Ok((analysis, recommendation))
}

/// Analyze and enqueue a submission for operator review.
pub async fn submit(
    source: IngestSource,
    created_by: &str,
    chunker: &ChunkerOptions,
    db: &SurrealDbClient,
) -> Result<IngestRequest, AppError> {
    let (analysis, recommendation) = analyze_source(&source, chunker, db).await?;
    let request = IngestRequest::new(source, analysis, recommendation, created_by);
    db.store_item(request.clone()).await?;
    info!(
        request_id = %request.id,
        source = %request.source.label(),
        ?recommendation,
        "intake request recorded"
    );
    Ok(request)
}

/// Run an approved request through the pipeline, recording the outcome on
/// the request row.
pub async fn approve(
    request_id: &str,
    pipeline: &IngestionPipeline,
    options: IngestOptions,
) -> Result<IngestReport, AppError> {
    let db = pipeline.db();
    let request: Option<IngestRequest> = db.get_item(request_id).await?;
    let request = request
        .ok_or_else(|| AppError::NotFound(format!("ingest request {request_id}")))?;

    match request.status {
        IngestRequestStatus::AwaitingReview | IngestRequestStatus::Approved => {}
        other => {
            return Err(AppError::InputInvalid(format!(
                "ingest request {request_id} is not approvable in status {other:?}"
            )));
        }
    }

    IngestRequest::update_status(request_id, IngestRequestStatus::Processing, db).await?;

    let outcome = async {
        let (source_path, bytes) = load_source(&request.source).await?;
        pipeline.ingest_source(&source_path, &bytes, options).await
    }
    .await;

    match outcome {
        Ok(report) => {
            IngestRequest::finish(
                request_id,
                IngestRequestStatus::Completed,
                Some(report.document_id.clone()),
                None,
                db,
            )
            .await?;
            Ok(report)
        }
        Err(err) => {
            IngestRequest::finish(
                request_id,
                IngestRequestStatus::Failed,
                None,
                Some(format!("{}: {err}", err.kind())),
                db,
            )
            .await?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::utils::authority::{AuthorityConfig, AuthorityScorer};
    use common::utils::embedding::testing::CountingEmbedder;
    use uuid::Uuid;

    use super::*;

    async fn memory_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        )
    }

    fn chunker() -> ChunkerOptions {
        ChunkerOptions {
            max_chunk: 1500,
            min_chunk: 4,
            overlap: 50,
        }
    }

    fn pipeline(db: &Arc<SurrealDbClient>) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::clone(db),
            Arc::new(CountingEmbedder::new(4, "test-model")),
            Arc::new(AuthorityScorer::from_config(AuthorityConfig::default())),
            None,
            chunker(),
        )
    }

    fn inline(text: &str) -> IngestSource {
        IngestSource::Inline {
            title: "submission".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn clean_submission_is_approved() {
        let db = memory_db().await;
        let source = inline(
            "---\ntitle: A Text\nauthor: Someone\n---\nA paragraph with some words in it.",
        );
        let (analysis, recommendation) = analyze_source(&source, &chunker(), &db)
            .await
            .expect("analyze");
        assert_eq!(recommendation, IngestRecommendation::Approve);
        assert_eq!(analysis.language, "en");
        assert_eq!(analysis.estimated_paragraphs, 1);
        assert!(analysis.duplicate_of.is_none());
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let db = memory_db().await;
        let source = inline("---\ntitle: Empty\n---\n   ");
        let (analysis, recommendation) = analyze_source(&source, &chunker(), &db)
            .await
            .expect("analyze");
        assert_eq!(recommendation, IngestRecommendation::Reject);
        assert!(!analysis.notes.is_empty());
    }

    #[tokio::test]
    async fn missing_metadata_needs_review() {
        let db = memory_db().await;
        let source = inline("Just a body paragraph without any frontmatter at all.");
        let (_, recommendation) = analyze_source(&source, &chunker(), &db)
            .await
            .expect("analyze");
        assert_eq!(recommendation, IngestRecommendation::Review);
    }

    #[tokio::test]
    async fn arabic_submission_is_detected() {
        let db = memory_db().await;
        let source = inline("بسم الله الرحمن الرحيم والصلاة والسلام على رسول الله");
        let (analysis, _) = analyze_source(&source, &chunker(), &db)
            .await
            .expect("analyze");
        assert_eq!(analysis.language, "ar");
        assert!(analysis.is_rtl);
    }

    #[tokio::test]
    async fn approval_runs_ingestion_and_records_target() {
        let db = memory_db().await;
        let pipeline = pipeline(&db);
        let request = submit(
            inline("---\ntitle: A Text\nauthor: Someone\n---\nA paragraph with some words."),
            "operator",
            &chunker(),
            &db,
        )
        .await
        .expect("submit");

        let report = approve(&request.id, &pipeline, IngestOptions::default())
            .await
            .expect("approve");
        assert_eq!(report.new, 1);

        let stored: Option<IngestRequest> = db.get_item(&request.id).await.expect("get");
        let stored = stored.expect("request");
        assert_eq!(stored.status, IngestRequestStatus::Completed);
        assert_eq!(stored.target_document_id, Some(report.document_id));
    }

    #[tokio::test]
    async fn duplicate_submission_is_flagged_after_ingest() {
        let db = memory_db().await;
        let pipeline = pipeline(&db);
        let text = "---\ntitle: A Text\nauthor: Someone\n---\nA paragraph with some words.";

        let request = submit(inline(text), "operator", &chunker(), &db)
            .await
            .expect("submit");
        approve(&request.id, &pipeline, IngestOptions::default())
            .await
            .expect("approve");

        let (analysis, recommendation) = analyze_source(&inline(text), &chunker(), &db)
            .await
            .expect("analyze");
        assert!(analysis.duplicate_of.is_some());
        assert_eq!(recommendation, IngestRecommendation::Review);
    }

    #[tokio::test]
    async fn rejected_requests_cannot_be_approved() {
        let db = memory_db().await;
        let pipeline = pipeline(&db);
        let request = submit(inline("---\ntitle: Empty\n---\n  "), "operator", &chunker(), &db)
            .await
            .expect("submit");
        assert_eq!(request.status, IngestRequestStatus::Rejected);

        let result = approve(&request.id, &pipeline, IngestOptions::default()).await;
        assert!(result.is_err());
    }
}

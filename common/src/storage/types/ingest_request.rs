use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;

/// What was submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IngestSource {
    File { path: String },
    Inline { title: String, text: String },
    Url { url: String },
}

impl IngestSource {
    pub fn label(&self) -> &str {
        match self {
            Self::File { path } => path,
            Self::Inline { title, .. } => title,
            Self::Url { url } => url,
        }
    }
}

/// Deterministic pre-ingestion analysis of a submitted source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceAnalysis {
    pub language: String,
    pub is_rtl: bool,
    pub char_count: usize,
    pub estimated_paragraphs: usize,
    pub duplicate_of: Option<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestRecommendation {
    Approve,
    Review,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestRequestStatus {
    AwaitingReview,
    Approved,
    Processing,
    Completed,
    Failed,
    Rejected,
}

stored_object!(IngestRequest, "ingest_request", {
    source: IngestSource,
    analysis: SourceAnalysis,
    recommendation: IngestRecommendation,
    status: IngestRequestStatus,
    target_document_id: Option<String>,
    created_by: String,
    error: Option<String>
});

impl IngestRequest {
    pub fn new(
        source: IngestSource,
        analysis: SourceAnalysis,
        recommendation: IngestRecommendation,
        created_by: &str,
    ) -> Self {
        let now = chrono::Utc::now();
        let status = match recommendation {
            IngestRecommendation::Reject => IngestRequestStatus::Rejected,
            _ => IngestRequestStatus::AwaitingReview,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source,
            analysis,
            recommendation,
            status,
            target_document_id: None,
            created_by: created_by.to_string(),
            error: None,
        }
    }

    pub async fn update_status(
        id: &str,
        status: IngestRequestStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('ingest_request', $id) SET status = $status, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("status", status))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn finish(
        id: &str,
        status: IngestRequestStatus,
        target_document_id: Option<String>,
        error: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('ingest_request', $id) SET status = $status, \
             target_document_id = $target, error = $error, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("status", status))
        .bind(("target", target_document_id))
        .bind(("error", error))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn awaiting_review(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .query(
                "SELECT * FROM ingest_request WHERE status = 'awaiting_review' ORDER BY created_at ASC",
            )
            .await?
            .take(0)?;
        Ok(rows)
    }
}

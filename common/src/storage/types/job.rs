use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::stored_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Translation,
    Resegmentation,
    #[serde(rename = "embedding_migration")]
    EmbeddingMigration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

stored_object!(Job, "job", {
    job_type: JobType,
    status: JobStatus,
    priority: i64,
    params: serde_json::Value,
    document_id: Option<String>,
    worker_id: Option<String>,
    progress_done: usize,
    progress_total: usize,
    cancel_requested: bool,
    #[serde(
        serialize_with = "crate::storage::types::serialize_option_datetime",
        deserialize_with = "crate::storage::types::deserialize_option_datetime",
        default
    )]
    last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(
        serialize_with = "crate::storage::types::serialize_option_datetime",
        deserialize_with = "crate::storage::types::deserialize_option_datetime",
        default
    )]
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(
        serialize_with = "crate::storage::types::serialize_option_datetime",
        deserialize_with = "crate::storage::types::deserialize_option_datetime",
        default
    )]
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    error: Option<String>
});

impl Job {
    pub fn new(
        job_type: JobType,
        params: serde_json::Value,
        priority: i64,
        document_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_type,
            status: JobStatus::Pending,
            priority,
            params,
            document_id,
            worker_id: None,
            progress_done: 0,
            progress_total: 0,
            cancel_requested: false,
            last_heartbeat: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Enqueue a job, returning its id.
    pub async fn enqueue(
        job_type: JobType,
        params: serde_json::Value,
        priority: i64,
        document_id: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<String, AppError> {
        let job = Self::new(job_type, params, priority, document_id);
        let id = job.id.clone();
        db.store_item(job).await?;
        Ok(id)
    }

    /// Claim the next runnable job for this worker: the highest-priority
    /// pending job, or a processing job whose heartbeat went stale beyond
    /// `stale_after`. The claim is one UPDATE statement, so two workers
    /// cannot claim the same job.
    pub async fn claim_next(
        worker_id: &str,
        stale_after: Duration,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let cutoff = Utc::now() - stale_after;
        let mut response = db
            .query(
                "UPDATE job SET status = 'processing', worker_id = $worker_id, \
                 last_heartbeat = time::now(), started_at = started_at ?? time::now(), \
                 updated_at = time::now() \
                 WHERE id IN (SELECT VALUE id FROM ( \
                    SELECT id, priority, created_at FROM job \
                    WHERE status = 'pending' \
                       OR (status = 'processing' AND last_heartbeat < $cutoff) \
                    ORDER BY priority DESC, created_at ASC LIMIT 1)) \
                 RETURN AFTER",
            )
            .bind(("worker_id", worker_id.to_string()))
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await?;
        let mut rows: Vec<Self> = response.take(0)?;
        Ok(rows.pop())
    }

    /// Refresh the heartbeat while holding the job.
    pub async fn heartbeat(id: &str, worker_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET last_heartbeat = time::now(), updated_at = time::now() \
             WHERE worker_id = $worker_id AND status = 'processing'",
        )
        .bind(("id", id.to_string()))
        .bind(("worker_id", worker_id.to_string()))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn report_progress(
        id: &str,
        done: usize,
        total: usize,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET progress_done = $done, progress_total = $total, \
             last_heartbeat = time::now(), updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("done", done as i64))
        .bind(("total", total as i64))
        .await?
        .check()?;
        Ok(())
    }

    /// Terminal transition with an optional error message.
    pub async fn complete(
        id: &str,
        status: JobStatus,
        error: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET status = $status, error = $error, \
             finished_at = time::now(), updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("status", status))
        .bind(("error", error))
        .await?
        .check()?;
        Ok(())
    }

    /// Cooperative cancellation: set the flag; the worker observes it
    /// between paragraphs and finishes with `cancelled`.
    pub async fn request_cancel(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('job', $id) SET cancel_requested = true, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn is_cancel_requested(id: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        let job: Option<Self> = db.get_item(id).await?;
        Ok(job.is_some_and(|j| j.cancel_requested))
    }
}

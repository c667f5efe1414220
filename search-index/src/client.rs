use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use common::error::AppError;

/// HTTP timeout for individual engine calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to poll an enqueued engine task before giving up.
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(200);
const TASK_POLL_ATTEMPTS: usize = 300;

/// Minimal client for the engine's REST API. Writes are task-based: the
/// engine acknowledges with a task uid which callers await.
#[derive(Clone)]
pub struct MeiliClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MeiliClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::SearchFailed(format!("search client build: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Issue a request and return `(status, body)`. Network-level failures
    /// surface as `search_failed`; HTTP error statuses are the caller's to
    /// interpret (some, like an already-existing index, are benign).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), AppError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method, &url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::SearchFailed(format!("search request {url}: {e}")))?;
        let status = response.status();
        let body: Value = if status == StatusCode::NO_CONTENT {
            Value::Null
        } else {
            response.json().await.unwrap_or(Value::Null)
        };
        Ok((status, body))
    }

    /// Issue a write and return the enqueued task uid.
    pub async fn enqueue(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<u64, AppError> {
        let (status, body) = self.request(method, path, body).await?;
        if !status.is_success() {
            return Err(AppError::SearchFailed(format!(
                "search write {path} rejected with {status}: {body}"
            )));
        }
        body.get("taskUid")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                AppError::SearchFailed(format!("search write {path} returned no task uid: {body}"))
            })
    }

    /// Poll a task until it reaches a terminal status. A failed task is a
    /// `search_failed`; exhausting the poll budget is `deadline_exceeded`.
    pub async fn wait_for_task(&self, task_uid: u64) -> Result<(), AppError> {
        for _ in 0..TASK_POLL_ATTEMPTS {
            let (status, body) = self
                .request(Method::GET, &format!("/tasks/{task_uid}"), None)
                .await?;
            if !status.is_success() {
                return Err(AppError::SearchFailed(format!(
                    "task {task_uid} lookup failed with {status}"
                )));
            }
            match body.get("status").and_then(Value::as_str) {
                Some("succeeded") => {
                    debug!(task_uid, "search task succeeded");
                    return Ok(());
                }
                Some("failed") | Some("canceled") => {
                    let error = body
                        .get("error")
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown engine error".to_string());
                    return Err(AppError::SearchFailed(format!(
                        "task {task_uid} failed: {error}"
                    )));
                }
                _ => tokio::time::sleep(TASK_POLL_INTERVAL).await,
            }
        }
        Err(AppError::DeadlineExceeded(format!(
            "search task {task_uid} did not settle in time"
        )))
    }

    /// Enqueue a write and await its completion.
    pub async fn enqueue_and_wait(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(), AppError> {
        let task_uid = self.enqueue(method, path, body).await?;
        self.wait_for_task(task_uid).await
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::document::Document;
use common::storage::types::paragraph::Paragraph;
use search_index::{SearchDocument, SearchIndex, SearchParagraph};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(10),
        }
    }
}

/// Ship one bounded batch of unsynced rows, grouped by document. Returns
/// the number of rows settled. Idempotent: re-sending a row is safe, and
/// the synced flip is conditional on the row being unmodified since ship.
pub async fn sync_once(
    db: &SurrealDbClient,
    index: &dyn SearchIndex,
    batch_size: usize,
) -> Result<usize, AppError> {
    let pending = Paragraph::list_unsynced(batch_size, db).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut by_document: BTreeMap<String, Vec<Paragraph>> = BTreeMap::new();
    for row in pending {
        by_document.entry(row.document_id.clone()).or_default().push(row);
    }

    let mut settled = 0usize;
    for (document_id, rows) in by_document {
        let doc: Option<Document> = db.get_item(&document_id).await?;

        match doc {
            None => {
                // Orphaned rows: the document vanished entirely. Withdraw
                // the search presence and settle the rows.
                warn!(%document_id, "unsynced rows without a document; withdrawing");
                index.delete_document(&document_id).await?;
                flip_rows(db, &rows).await?;
                settled += rows.len();
            }
            Some(doc) if doc.is_deleted() => {
                index.delete_document(&document_id).await?;
                flip_rows(db, &rows).await?;
                settled += rows.len();
            }
            Some(doc) => {
                // Re-ship the whole document so dropped rows disappear and
                // every row carries current document attributes.
                let all_rows = Paragraph::for_document(&document_id, db).await?;
                let search_rows: Vec<SearchParagraph> = all_rows
                    .iter()
                    .map(|row| SearchParagraph::from_row(&doc, row))
                    .collect();
                index
                    .index_document(&SearchDocument::from(&doc), &search_rows)
                    .await?;

                let unsynced: Vec<Paragraph> =
                    all_rows.into_iter().filter(|row| !row.synced).collect();
                flip_rows(db, &unsynced).await?;
                settled += unsynced.len();
                info!(%document_id, rows = unsynced.len(), "document synced");
            }
        }
    }

    Ok(settled)
}

async fn flip_rows(db: &SurrealDbClient, rows: &[Paragraph]) -> Result<(), AppError> {
    let shipped: Vec<(String, chrono::DateTime<chrono::Utc>)> = rows
        .iter()
        .map(|row| (row.id.clone(), row.updated_at))
        .collect();
    Paragraph::mark_synced(&shipped, db).await
}

/// The long-running worker: poll, ship, back off on trouble. Rows touched
/// by a failed ship stay unsynced and are retried on the next pass.
pub async fn run_sync_worker(
    db: Arc<SurrealDbClient>,
    index: Arc<dyn SearchIndex>,
    options: SyncOptions,
) {
    info!(batch_size = options.batch_size, "sync worker started");
    loop {
        match sync_once(&db, index.as_ref(), options.batch_size).await {
            Ok(0) => sleep(options.poll_interval).await,
            Ok(settled) => {
                info!(settled, "sync pass finished");
            }
            Err(err) => {
                error!(error = %err, kind = err.kind(), "sync pass failed; backing off");
                sleep(options.error_backoff).await;
            }
        }
    }
}

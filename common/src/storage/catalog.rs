use tokio::time::{sleep, Duration};
use tracing::warn;

use super::db::SurrealDbClient;
use super::types::paragraph::Paragraph;
use crate::error::AppError;
use crate::utils::chunker::BlockType;

/// An in-place update of an existing paragraph row. The embedding columns
/// are not touched: reuse and reordering never invalidate vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphUpdate {
    pub id: String,
    pub paragraph_index: usize,
    pub text: String,
    pub content_hash: String,
    pub heading: Option<String>,
    pub blocktype: BlockType,
}

/// The minimum set of row operations turning a document's stored paragraph
/// set into the newly chunked one.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub deletes: Vec<String>,
    pub updates: Vec<ParagraphUpdate>,
    pub inserts: Vec<Paragraph>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.inserts.is_empty()
    }
}

const MAX_ATTEMPTS: usize = 5;
const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 800;

/// Apply a change set in one transaction, flushing DELETEs before UPDATEs
/// before INSERTs so an id freed by an evicted paragraph can be re-created
/// by a reused hash within the same commit. Write conflicts are retried
/// with backoff and jitter before surfacing as `store_busy`.
pub async fn apply_changeset(db: &SurrealDbClient, changeset: &ChangeSet) -> Result<(), AppError> {
    if changeset.is_empty() {
        return Ok(());
    }

    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 0..MAX_ATTEMPTS {
        match run_changeset_transaction(db, changeset).await {
            Ok(()) => return Ok(()),
            Err(err) if is_retryable_conflict(&err) => {
                if attempt + 1 == MAX_ATTEMPTS {
                    return Err(AppError::StoreBusy(format!(
                        "change set still conflicting after {MAX_ATTEMPTS} attempts: {err}"
                    )));
                }
                warn!(
                    attempt = attempt + 1,
                    "transient catalog conflict while applying change set; retrying"
                );
                sleep(Duration::from_millis(with_jitter(backoff_ms))).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }

    Err(AppError::StoreBusy(
        "change set application exhausted retries".to_string(),
    ))
}

async fn run_changeset_transaction(
    db: &SurrealDbClient,
    changeset: &ChangeSet,
) -> Result<(), AppError> {
    let mut query = db.client.query("BEGIN TRANSACTION;");

    for (i, id) in changeset.deletes.iter().enumerate() {
        query = query
            .query(format!("DELETE type::thing('content', $del_{i});"))
            .bind((format!("del_{i}"), id.clone()));
    }

    for (i, update) in changeset.updates.iter().enumerate() {
        query = query
            .query(format!(
                "UPDATE type::thing('content', $upd_{i}_id) SET \
                 paragraph_index = $upd_{i}_index, \
                 text = $upd_{i}_text, \
                 content_hash = $upd_{i}_hash, \
                 heading = $upd_{i}_heading, \
                 blocktype = $upd_{i}_blocktype, \
                 synced = false, \
                 updated_at = time::now();"
            ))
            .bind((format!("upd_{i}_id"), update.id.clone()))
            .bind((format!("upd_{i}_index"), update.paragraph_index as i64))
            .bind((format!("upd_{i}_text"), update.text.clone()))
            .bind((format!("upd_{i}_hash"), update.content_hash.clone()))
            .bind((format!("upd_{i}_heading"), update.heading.clone()))
            .bind((format!("upd_{i}_blocktype"), update.blocktype));
    }

    for (i, insert) in changeset.inserts.iter().enumerate() {
        query = query
            .query(format!(
                "CREATE type::thing('content', $ins_{i}_id) CONTENT $ins_{i};"
            ))
            .bind((format!("ins_{i}_id"), insert.id.clone()))
            .bind((format!("ins_{i}"), insert.clone()));
    }

    let response = query.query("COMMIT TRANSACTION;").await?;
    response.check()?;
    Ok(())
}

/// Transactional full rewrite: drop every row for the document and write
/// the new set. The incremental path is preferred; this backs the rewrite
/// reuse mode and the re-ingestion jobs.
pub async fn replace_paragraphs(
    db: &SurrealDbClient,
    document_id: &str,
    rows: &[Paragraph],
) -> Result<(), AppError> {
    let mut query = db
        .client
        .query("BEGIN TRANSACTION;")
        .query("DELETE content WHERE document_id = $document_id;")
        .bind(("document_id", document_id.to_string()));

    for (i, row) in rows.iter().enumerate() {
        query = query
            .query(format!(
                "CREATE type::thing('content', $row_{i}_id) CONTENT $row_{i};"
            ))
            .bind((format!("row_{i}_id"), row.id.clone()))
            .bind((format!("row_{i}"), row.clone()));
    }

    let response = query.query("COMMIT TRANSACTION;").await?;
    response.check()?;
    Ok(())
}

fn is_retryable_conflict(error: &AppError) -> bool {
    match error {
        AppError::StoreFailed(err) => err
            .to_string()
            .contains("Failed to commit transaction due to a read or write conflict"),
        _ => false,
    }
}

fn with_jitter(base_ms: u64) -> u64 {
    // Cheap decorrelated jitter off the subsecond clock; the retry spread
    // matters, cryptographic quality does not.
    let nanos = u64::from(chrono::Utc::now().timestamp_subsec_nanos());
    base_ms / 2 + nanos % (base_ms / 2 + 1)
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

    fn row(document_id: &str, index: usize, text: &str) -> Paragraph {
        Paragraph::new(
            document_id,
            index,
            text.to_string(),
            content_hash(text, document_id),
            None,
            BlockType::Paragraph,
        )
    }

    #[tokio::test]
    async fn apply_inserts_and_deletes() {
        let db = memory_db().await;
        let keep = row("doc1", 0, "kept paragraph");
        let evicted = row("doc1", 1, "evicted paragraph");
        db.store_item(keep.clone()).await.expect("store");
        db.store_item(evicted.clone()).await.expect("store");

        let incoming = row("doc1", 1, "new paragraph");
        let changeset = ChangeSet {
            deletes: vec![evicted.id.clone()],
            updates: vec![],
            inserts: vec![incoming.clone()],
        };
        apply_changeset(&db, &changeset).await.expect("apply");

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.id == keep.id));
        assert!(rows.iter().any(|r| r.id == incoming.id));
        assert!(!rows.iter().any(|r| r.id == evicted.id));
    }

    #[tokio::test]
    async fn updates_preserve_embedding_bytes() {
        let db = memory_db().await;
        let stored = row("doc1", 0, "movable paragraph").with_embedding(&[0.5, 0.25], "model-x");
        let original_blob = stored.embedding.clone();
        db.store_item(stored.clone()).await.expect("store");

        let changeset = ChangeSet {
            deletes: vec![],
            updates: vec![ParagraphUpdate {
                id: stored.id.clone(),
                paragraph_index: 3,
                text: stored.text.clone(),
                content_hash: stored.content_hash.clone(),
                heading: Some("New Heading".to_string()),
                blocktype: BlockType::Paragraph,
            }],
            inserts: vec![],
        };
        apply_changeset(&db, &changeset).await.expect("apply");

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].paragraph_index, 3);
        assert_eq!(rows[0].heading.as_deref(), Some("New Heading"));
        assert_eq!(rows[0].embedding, original_blob);
        assert_eq!(rows[0].embedding_model.as_deref(), Some("model-x"));
        assert!(!rows[0].synced);
    }

    #[tokio::test]
    async fn delete_then_insert_reuses_id_within_one_commit() {
        let db = memory_db().await;
        let old = row("doc1", 0, "same words either way");
        db.store_item(old.clone()).await.expect("store");

        // The incoming row normalizes to the same words, so it derives the
        // same id; the delete must flush first for the create to succeed.
        let incoming = row("doc1", 5, "same  words   either way");
        assert_eq!(old.id, incoming.id);

        let changeset = ChangeSet {
            deletes: vec![old.id.clone()],
            updates: vec![],
            inserts: vec![incoming],
        };
        apply_changeset(&db, &changeset).await.expect("apply");

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].paragraph_index, 5);
    }

    #[tokio::test]
    async fn replace_paragraphs_swaps_the_full_set() {
        let db = memory_db().await;
        db.store_item(row("doc1", 0, "old row a")).await.expect("store");
        db.store_item(row("doc1", 1, "old row b")).await.expect("store");
        db.store_item(row("doc2", 0, "other document row"))
            .await
            .expect("store");

        let fresh = vec![row("doc1", 0, "replacement row")];
        replace_paragraphs(&db, "doc1", &fresh).await.expect("replace");

        let rows = Paragraph::for_document("doc1", &db).await.expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "replacement row");

        let untouched = Paragraph::for_document("doc2", &db).await.expect("rows");
        assert_eq!(untouched.len(), 1);
    }

    #[tokio::test]
    async fn empty_changeset_is_a_noop() {
        let db = memory_db().await;
        apply_changeset(&db, &ChangeSet::default()).await.expect("apply");
    }
}

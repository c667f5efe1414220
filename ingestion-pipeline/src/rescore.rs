use serde_json::json;
use tracing::info;

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::document::Document;
use common::storage::types::paragraph::Paragraph;
use common::utils::authority::AuthorityScorer;
use search_index::SearchIndex;

/// Re-apply the authority config across the catalog, typically after a
/// `reload()`. The document row is patched in the search store immediately;
/// paragraph rows follow through the sync worker. No embeddings move.
pub async fn rescore_documents(
    db: &SurrealDbClient,
    scorer: &AuthorityScorer,
    index: &dyn SearchIndex,
) -> Result<usize, AppError> {
    let documents: Vec<Document> = db.get_all_stored_items().await?;
    let mut changed = 0usize;

    for doc in documents {
        if doc.is_deleted() {
            continue;
        }
        let fresh = scorer.score(&doc.author, &doc.religion, &doc.collection);
        if fresh == doc.authority {
            continue;
        }

        db.query(
            "UPDATE type::thing('document', $id) SET authority = $authority, updated_at = time::now()",
        )
        .bind(("id", doc.id.clone()))
        .bind(("authority", i64::from(fresh)))
        .await?
        .check()?;

        index
            .update_partial(&doc.id, json!({ "authority": fresh }))
            .await?;
        Paragraph::mark_unsynced(&doc.id, db).await?;

        info!(document_id = %doc.id, from = doc.authority, to = fresh, "authority rescored");
        changed += 1;
    }

    Ok(changed)
}

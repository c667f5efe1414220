use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::StoredObject;
use crate::stored_object;

stored_object!(Document, "document", {
    title: String,
    author: String,
    religion: String,
    collection: String,
    language: String,
    is_rtl: bool,
    year: Option<i32>,
    description: String,
    authority: u8,
    paragraph_count: usize,
    source_path: String,
    file_hash: String,
    body_hash: String,
    #[serde(
        serialize_with = "crate::storage::types::serialize_option_datetime",
        deserialize_with = "crate::storage::types::deserialize_option_datetime",
        default
    )]
    deleted_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Document {
    /// Merge by id: `created_at` is filled on first write, `updated_at`
    /// always. The single-writer-per-document policy makes read-then-write
    /// safe here.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let existing: Option<Self> = db.get_item(&self.id).await?;
        let mut doc = self;
        doc.updated_at = chrono::Utc::now();

        match existing {
            Some(previous) => {
                doc.created_at = previous.created_at;
                let updated: Option<Self> = db
                    .update((Self::table_name(), doc.id.clone()))
                    .content(doc)
                    .await?;
                updated.ok_or_else(|| {
                    AppError::InternalError("document upsert returned no row".into())
                })
            }
            None => {
                doc.created_at = doc.updated_at;
                let created = db.store_item(doc).await?;
                created.ok_or_else(|| {
                    AppError::InternalError("document create returned no row".into())
                })
            }
        }
    }

    pub async fn find_by_source_path(
        source_path: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut rows: Vec<Self> = db
            .query("SELECT * FROM document WHERE source_path = $source_path LIMIT 1")
            .bind(("source_path", source_path.to_string()))
            .await?
            .take(0)?;
        Ok(rows.pop())
    }

    /// Duplicate detection for the intake queue: any document already
    /// carrying this exact file hash.
    pub async fn find_by_file_hash(
        file_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut rows: Vec<Self> = db
            .query("SELECT * FROM document WHERE file_hash = $file_hash LIMIT 1")
            .bind(("file_hash", file_hash.to_string()))
            .await?
            .take(0)?;
        Ok(rows.pop())
    }

    /// Soft delete: the row stays for reaping, paragraphs are flagged so
    /// the sync worker withdraws them from the search store.
    pub async fn soft_delete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('document', $id) SET deleted_at = time::now(), updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .await?
        .check()?;
        super::paragraph::Paragraph::mark_unsynced(id, db).await?;
        Ok(())
    }

    pub async fn set_paragraph_count(
        id: &str,
        count: usize,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('document', $id) SET paragraph_count = $count, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("count", count as i64))
        .await?
        .check()?;
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

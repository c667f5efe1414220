use serde::{Deserialize, Serialize};
use serde_json::json;

use common::storage::types::document::Document;
use common::storage::types::paragraph::Paragraph;

/// Document-index row: the catalog document minus storage bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    pub title: String,
    pub author: String,
    pub religion: String,
    pub collection: String,
    pub language: String,
    pub year: Option<i32>,
    pub description: String,
    pub authority: u8,
    pub paragraph_count: usize,
    pub created_at: i64,
}

impl From<&Document> for SearchDocument {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            author: doc.author.clone(),
            religion: doc.religion.clone(),
            collection: doc.collection.clone(),
            language: doc.language.clone(),
            year: doc.year,
            description: doc.description.clone(),
            authority: doc.authority,
            paragraph_count: doc.paragraph_count,
            created_at: doc.created_at.timestamp(),
        }
    }
}

/// Paragraph-index row: text plus every filterable/sortable attribute the
/// ranking depends on, and the user-provided vector when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParagraph {
    pub id: String,
    pub document_id: String,
    pub paragraph_index: usize,
    pub text: String,
    pub heading: Option<String>,
    pub title: String,
    pub author: String,
    pub religion: String,
    pub collection: String,
    pub language: String,
    pub year: Option<i32>,
    pub blocktype: String,
    pub authority: u8,
    pub created_at: i64,
    #[serde(rename = "_vectors", skip_serializing_if = "Option::is_none")]
    pub vectors: Option<serde_json::Value>,
}

impl SearchParagraph {
    pub fn from_row(doc: &Document, row: &Paragraph) -> Self {
        let vectors = row.embedding.as_ref().map(|blob| {
            json!({
                "default": {
                    "embeddings": blob.to_floats(),
                    "regenerate": false,
                }
            })
        });
        Self {
            id: row.id.clone(),
            document_id: row.document_id.clone(),
            paragraph_index: row.paragraph_index,
            text: row.text.clone(),
            heading: row.heading.clone(),
            title: doc.title.clone(),
            author: doc.author.clone(),
            religion: doc.religion.clone(),
            collection: doc.collection.clone(),
            language: doc.language.clone(),
            year: doc.year,
            blocktype: row.blocktype.as_str().to_string(),
            authority: doc.authority,
            created_at: row.created_at.timestamp(),
            vectors,
        }
    }
}

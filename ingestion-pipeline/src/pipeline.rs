use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::error::AppError;
use common::storage::catalog::{apply_changeset, replace_paragraphs, ChangeSet, ParagraphUpdate};
use common::storage::db::SurrealDbClient;
use common::storage::types::document::Document;
use common::storage::types::paragraph::Paragraph;
use common::utils::authority::AuthorityScorer;
use common::utils::chunker::chunk_blocks;
use common::utils::config::ChunkerOptions;
use common::utils::embedding::EmbeddingProvider;
use common::utils::frontmatter::split_frontmatter;
use common::utils::hashing::{body_hash, content_hash, file_hash};
use common::utils::language::{detect, resolve_language};
use common::utils::markers::{has_sentence_punctuation, mark_sentences, normalize_text};

use crate::llm::segmenter::LlmSegmenter;
use crate::reconcile::{reconcile, NewChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Unchanged,
    MetadataOnly,
    Reingested,
    Created,
}

/// The completion report of one ingestion, serialized for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub status: IngestStatus,
    pub paragraph_count: usize,
    pub reused: usize,
    pub new: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReuseMode {
    /// Content-hash reconcile producing the minimal DELETE/UPDATE/INSERT set.
    #[default]
    Incremental,
    /// Full rewrite through `replace_paragraphs`, embeddings sourced from
    /// the hash-keyed cache.
    Rewrite,
}

/// Explicit per-call knobs; everything else rides on the pipeline.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub language_override: Option<String>,
    pub authority_override: Option<u8>,
    pub skip_segmentation: bool,
    pub reuse_mode: ReuseMode,
}

pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    authority: Arc<AuthorityScorer>,
    segmenter: Option<Arc<LlmSegmenter>>,
    chunker: ChunkerOptions,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        authority: Arc<AuthorityScorer>,
        segmenter: Option<Arc<LlmSegmenter>>,
        chunker: ChunkerOptions,
    ) -> Self {
        Self {
            db,
            embedder,
            authority,
            segmenter,
            chunker,
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn authority(&self) -> &Arc<AuthorityScorer> {
        &self.authority
    }

    pub fn llm_segmenter(&self) -> Option<&Arc<LlmSegmenter>> {
        self.segmenter.as_ref()
    }

    pub async fn ingest_file(
        &self,
        path: impl AsRef<Path>,
        options: IngestOptions,
    ) -> Result<IngestReport, AppError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::InputInvalid(format!("unreadable file {}: {e}", path.display()))
        })?;
        self.ingest_source(&path.to_string_lossy(), &bytes, options)
            .await
    }

    /// The incremental reconcile. See the step comments; the order is the
    /// contract.
    pub async fn ingest_source(
        &self,
        source_path: &str,
        bytes: &[u8],
        options: IngestOptions,
    ) -> Result<IngestReport, AppError> {
        // 1. Whole-file short-circuit.
        let fhash = file_hash(bytes);
        let existing = Document::find_by_source_path(source_path, &self.db).await?;
        if let Some(doc) = &existing {
            if doc.file_hash == fhash && !doc.is_deleted() {
                info!(document_id = %doc.id, "source unchanged");
                return Ok(IngestReport {
                    document_id: doc.id.clone(),
                    status: IngestStatus::Unchanged,
                    paragraph_count: doc.paragraph_count,
                    reused: 0,
                    new: 0,
                    deleted: 0,
                });
            }
        }

        // 2. Frontmatter split and body hash.
        let input = std::str::from_utf8(bytes)
            .map_err(|_| AppError::InputInvalid(format!("{source_path} is not valid UTF-8")))?;
        let (metadata, body) = split_frontmatter(input);
        if body.trim().is_empty() {
            return Err(AppError::InputInvalid(format!("{source_path}: empty body")));
        }
        let bhash = body_hash(body);

        // 3. Metadata merge: caller > frontmatter > path-inferred > defaults.
        let inferred = PathMeta::infer(source_path);
        let document_id = existing
            .as_ref()
            .map(|d| d.id.clone())
            .or_else(|| metadata.get("id").cloned())
            .unwrap_or_else(|| inferred.id.clone());
        let merged = MergedMetadata::merge(&metadata, &inferred);
        let (language, is_rtl) = match &options.language_override {
            Some(lang) => (lang.trim().to_lowercase(), detect(body).is_rtl),
            None => resolve_language(metadata.get("language").map(String::as_str), body),
        };
        let authority = options.authority_override.map_or_else(
            || {
                self.authority
                    .score(&merged.author, &merged.religion, &merged.collection)
            },
            |a| a.clamp(1, 10),
        );

        // Frontmatter-only edit: refresh the document row, flag every
        // paragraph for the sync worker, touch no content.
        if let Some(doc) = &existing {
            if doc.body_hash == bhash && !doc.is_deleted() {
                let updated = merged.into_document(
                    &document_id,
                    source_path,
                    &language,
                    is_rtl,
                    authority,
                    doc.paragraph_count,
                    &fhash,
                    &bhash,
                );
                updated.upsert(&self.db).await?;
                Paragraph::mark_unsynced(&document_id, &self.db).await?;
                info!(document_id = %document_id, "metadata-only update");
                return Ok(IngestReport {
                    document_id,
                    status: IngestStatus::MetadataOnly,
                    paragraph_count: doc.paragraph_count,
                    reused: 0,
                    new: 0,
                    deleted: 0,
                });
            }
        }

        // 4. Chunk and segment.
        let blocks = chunk_blocks(body, &self.chunker);
        let mut chunks: Vec<NewChunk> = Vec::with_capacity(blocks.len());
        let mut id_occurrences: HashMap<String, usize> = HashMap::new();
        for (paragraph_index, block) in blocks.into_iter().enumerate() {
            let (text, marker_failed) = if options.skip_segmentation {
                (block.text, false)
            } else {
                self.segment(block.text, is_rtl).await?
            };

            // 5. Content hash; the document id is the disambiguating context.
            let hash = content_hash(&text, &document_id);
            let mut id = Paragraph::make_id(&document_id, &text);
            let occurrence = id_occurrences.entry(id.clone()).or_insert(0);
            *occurrence += 1;
            if *occurrence > 1 {
                // Identical paragraphs repeat in liturgical texts; keep ids
                // unique by occurrence order.
                id = format!("{id}-{occurrence}");
            }

            chunks.push(NewChunk {
                id,
                paragraph_index,
                text,
                content_hash: hash,
                heading: block.heading,
                blocktype: block.blocktype,
                marker_failed,
            });
        }

        let paragraph_count = chunks.len();
        let status = if existing.is_some() {
            IngestStatus::Reingested
        } else {
            IngestStatus::Created
        };

        // 7-9. Match, embed misses, apply in DELETE-UPDATE-INSERT order.
        let (reused, new, deleted) = match options.reuse_mode {
            ReuseMode::Incremental => self.apply_incremental(&document_id, chunks).await?,
            ReuseMode::Rewrite => self.apply_rewrite(&document_id, chunks).await?,
        };

        // 10. Document row last: hashes, counts, authority.
        let doc = merged.into_document(
            &document_id,
            source_path,
            &language,
            is_rtl,
            authority,
            paragraph_count,
            &fhash,
            &bhash,
        );
        doc.upsert(&self.db).await?;

        // A resurrected document has been withdrawn from the search store;
        // every row must ship again, changed or not.
        if existing.as_ref().is_some_and(Document::is_deleted) {
            Paragraph::mark_unsynced(&document_id, &self.db).await?;
        }

        info!(
            document_id = %document_id,
            ?status,
            reused,
            new,
            deleted,
            "ingestion finished"
        );
        Ok(IngestReport {
            document_id,
            status,
            paragraph_count,
            reused,
            new,
            deleted,
        })
    }

    /// Segment one paragraph. Round-trip rejection is paragraph-local: the
    /// text is kept unmarked and flagged. Provider failures propagate.
    pub(crate) async fn segment(
        &self,
        text: String,
        is_rtl: bool,
    ) -> Result<(String, bool), AppError> {
        let result = if has_sentence_punctuation(&text) {
            mark_sentences(&text)
        } else if is_rtl {
            match &self.segmenter {
                Some(segmenter) => segmenter.mark_sentences(&text).await,
                None => Ok(single_sentence(&text)),
            }
        } else {
            Ok(single_sentence(&text))
        };

        match result {
            Ok(marked) => Ok((marked, false)),
            Err(AppError::ValidationFailed(message)) => {
                warn!(%message, "sentence markers rejected; storing paragraph unmarked");
                Ok((text, true))
            }
            Err(other) => Err(other),
        }
    }

    async fn apply_incremental(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<(usize, usize, usize), AppError> {
        let old_rows = Paragraph::for_document(document_id, &self.db).await?;
        let plan = reconcile(old_rows, chunks);

        // 8. One embedding batch for the genuinely new texts, before any
        // write: a provider failure leaves the catalog untouched.
        let texts: Vec<String> = plan
            .inserts
            .iter()
            .map(|c| normalize_text(&c.text))
            .collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let model = self.embedder.model_id().to_string();

        let inserts: Vec<Paragraph> = plan
            .inserts
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                let mut row = Paragraph::new(
                    document_id,
                    chunk.paragraph_index,
                    chunk.text.clone(),
                    chunk.content_hash.clone(),
                    chunk.heading.clone(),
                    chunk.blocktype,
                )
                .with_embedding(vector, &model);
                row.id = chunk.id.clone();
                row.marker_failed = chunk.marker_failed;
                row
            })
            .collect();

        let updates: Vec<ParagraphUpdate> = plan
            .reused
            .iter()
            .filter(|r| r.needs_update())
            .map(|r| ParagraphUpdate {
                id: r.existing.id.clone(),
                paragraph_index: r.incoming.paragraph_index,
                text: r.incoming.text.clone(),
                content_hash: r.incoming.content_hash.clone(),
                heading: r.incoming.heading.clone(),
                blocktype: r.incoming.blocktype,
            })
            .collect();

        let changeset = ChangeSet {
            deletes: plan.deletes.iter().map(|row| row.id.clone()).collect(),
            updates,
            inserts,
        };
        apply_changeset(&self.db, &changeset).await?;

        Ok((plan.reused.len(), plan.inserts.len(), plan.deletes.len()))
    }

    async fn apply_rewrite(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<(usize, usize, usize), AppError> {
        let model = self.embedder.model_id().to_string();
        let old_count = Paragraph::for_document(document_id, &self.db).await?.len();
        let cache = Paragraph::cached_embeddings(document_id, &model, &self.db).await?;

        let mut rows: Vec<Paragraph> = Vec::with_capacity(chunks.len());
        let mut miss_positions: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for chunk in &chunks {
            let mut row = Paragraph::new(
                document_id,
                chunk.paragraph_index,
                chunk.text.clone(),
                chunk.content_hash.clone(),
                chunk.heading.clone(),
                chunk.blocktype,
            );
            row.id = chunk.id.clone();
            row.marker_failed = chunk.marker_failed;
            if let Some(blob) = cache.get(&chunk.content_hash) {
                row.embedding = Some(blob.clone());
                row.embedding_model = Some(model.clone());
            } else {
                miss_positions.push(rows.len());
                miss_texts.push(normalize_text(&chunk.text));
            }
            rows.push(row);
        }

        let vectors = self.embedder.embed_batch(&miss_texts).await?;
        for (position, vector) in miss_positions.iter().zip(vectors.iter()) {
            if let Some(row) = rows.get_mut(*position) {
                row.embedding =
                    Some(common::storage::types::paragraph::EmbeddingBlob::from_floats(vector));
                row.embedding_model = Some(model.clone());
            }
        }

        replace_paragraphs(&self.db, document_id, &rows).await?;

        let reused = chunks.len() - miss_texts.len();
        Ok((reused, miss_texts.len(), old_count.saturating_sub(reused)))
    }
}

fn single_sentence(text: &str) -> String {
    format!("⁅s1⁆{text}⁅/s1⁆")
}

/// Metadata inferred from the source path:
/// `.../<religion>/<collection>/<file>.md`.
#[derive(Debug, Clone, Default)]
pub struct PathMeta {
    pub id: String,
    pub title: String,
    pub religion: Option<String>,
    pub collection: Option<String>,
}

impl PathMeta {
    pub fn infer(source_path: &str) -> Self {
        let path = Path::new(source_path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source_path.to_string());

        let mut ancestors = path
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect::<Vec<_>>();

        let collection = ancestors.pop();
        let religion = ancestors.pop();

        Self {
            id: slugify(&stem),
            title: prettify(&stem),
            religion,
            collection,
        }
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn prettify(stem: &str) -> String {
    stem.replace(['-', '_'], " ").trim().to_string()
}

/// The merged document metadata, before hashes and counts are attached.
#[derive(Debug, Clone)]
pub struct MergedMetadata {
    pub title: String,
    pub author: String,
    pub religion: String,
    pub collection: String,
    pub description: String,
    pub year: Option<i32>,
}

impl MergedMetadata {
    pub fn merge(frontmatter: &BTreeMap<String, String>, inferred: &PathMeta) -> Self {
        let pick = |key: &str| frontmatter.get(key).map(String::to_owned);
        Self {
            title: pick("title").unwrap_or_else(|| inferred.title.clone()),
            author: pick("author").unwrap_or_else(|| "Unknown".to_string()),
            religion: pick("religion")
                .or_else(|| inferred.religion.clone())
                .unwrap_or_default(),
            collection: pick("collection")
                .or_else(|| inferred.collection.clone())
                .unwrap_or_default(),
            description: pick("description").unwrap_or_default(),
            year: pick("year").and_then(|y| y.trim().parse().ok()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn into_document(
        self,
        document_id: &str,
        source_path: &str,
        language: &str,
        is_rtl: bool,
        authority: u8,
        paragraph_count: usize,
        file_hash: &str,
        body_hash: &str,
    ) -> Document {
        let now = chrono::Utc::now();
        Document {
            id: document_id.to_string(),
            created_at: now,
            updated_at: now,
            title: self.title,
            author: self.author,
            religion: self.religion,
            collection: self.collection,
            language: language.to_string(),
            is_rtl,
            year: self.year,
            description: self.description,
            authority,
            paragraph_count,
            source_path: source_path.to_string(),
            file_hash: file_hash.to_string(),
            body_hash: body_hash.to_string(),
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_inference_reads_religion_and_collection() {
        let meta = PathMeta::infer("library/bahai/core/hidden-words.md");
        assert_eq!(meta.id, "hidden-words");
        assert_eq!(meta.title, "hidden words");
        assert_eq!(meta.religion.as_deref(), Some("bahai"));
        assert_eq!(meta.collection.as_deref(), Some("core"));
    }

    #[test]
    fn path_inference_handles_bare_files() {
        let meta = PathMeta::infer("notes.md");
        assert_eq!(meta.id, "notes");
        assert!(meta.religion.is_none());
        assert!(meta.collection.is_none());
    }

    #[test]
    fn frontmatter_beats_path_inference() {
        let mut frontmatter = BTreeMap::new();
        frontmatter.insert("title".to_string(), "The Hidden Words".to_string());
        frontmatter.insert("religion".to_string(), "bahai".to_string());
        frontmatter.insert("year".to_string(), "1858".to_string());
        let inferred = PathMeta::infer("library/islam/misc/hidden-words.md");

        let merged = MergedMetadata::merge(&frontmatter, &inferred);
        assert_eq!(merged.title, "The Hidden Words");
        assert_eq!(merged.religion, "bahai");
        assert_eq!(merged.collection, "misc");
        assert_eq!(merged.year, Some(1858));
        assert_eq!(merged.author, "Unknown");
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("The Hidden Words (1858)"), "the-hidden-words-1858");
        assert_eq!(slugify("ya_sahifa"), "ya-sahifa");
    }

    #[test]
    fn reports_serialize_to_the_wire_shape() {
        let report = IngestReport {
            document_id: "doc1".to_string(),
            status: IngestStatus::MetadataOnly,
            paragraph_count: 4,
            reused: 0,
            new: 0,
            deleted: 0,
        };
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["status"], "metadata_only");
        assert_eq!(value["document_id"], "doc1");
        assert_eq!(value["paragraph_count"], 4);
    }
}

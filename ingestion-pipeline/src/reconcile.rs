use std::collections::HashMap;
use std::collections::VecDeque;

use common::storage::types::paragraph::Paragraph;
use common::utils::chunker::BlockType;

/// A freshly chunked paragraph, hashed and id-assigned, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub id: String,
    pub paragraph_index: usize,
    pub text: String,
    pub content_hash: String,
    pub heading: Option<String>,
    pub blocktype: BlockType,
    pub marker_failed: bool,
}

/// A chunk matched against an existing row. The row keeps its embedding;
/// only position, derived fields, and (for word-preserving rewrites) the
/// text move.
#[derive(Debug, Clone)]
pub struct ReusedParagraph {
    pub existing: Paragraph,
    pub incoming: NewChunk,
    /// The raw text changed while the words did not (marker or whitespace
    /// rewrites); text and content hash must be written.
    pub text_changed: bool,
}

impl ReusedParagraph {
    /// Whether anything on the row actually needs a write.
    pub fn needs_update(&self) -> bool {
        self.text_changed
            || self.existing.paragraph_index != self.incoming.paragraph_index
            || self.existing.heading != self.incoming.heading
            || self.existing.blocktype != self.incoming.blocktype
    }
}

/// The outcome of content-hash paragraph matching for one document.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub reused: Vec<ReusedParagraph>,
    pub inserts: Vec<NewChunk>,
    pub deletes: Vec<Paragraph>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty()
            && self.deletes.is_empty()
            && self.reused.iter().all(|r| !r.needs_update())
    }
}

/// Match new chunks against a document's stored rows.
///
/// First pass pairs by content hash (identical text and context: the row is
/// reused wholesale, possibly at a new index). Second pass pairs leftovers
/// by row id, which is derived from the normalized words: a marker or
/// whitespace rewrite keeps the id, so the row is updated in place and the
/// embedding survives. Whatever remains is inserted or deleted.
pub fn reconcile(existing: Vec<Paragraph>, chunks: Vec<NewChunk>) -> ReconcilePlan {
    let mut by_hash: HashMap<String, VecDeque<Paragraph>> = HashMap::new();
    for row in existing {
        by_hash.entry(row.content_hash.clone()).or_default().push_back(row);
    }

    let mut plan = ReconcilePlan::default();
    let mut unmatched: Vec<NewChunk> = Vec::new();

    for chunk in chunks {
        match by_hash.get_mut(&chunk.content_hash).and_then(VecDeque::pop_front) {
            Some(row) => plan.reused.push(ReusedParagraph {
                existing: row,
                incoming: chunk,
                text_changed: false,
            }),
            None => unmatched.push(chunk),
        }
    }

    let mut by_id: HashMap<String, Paragraph> = by_hash
        .into_values()
        .flatten()
        .map(|row| (row.id.clone(), row))
        .collect();

    for chunk in unmatched {
        match by_id.remove(&chunk.id) {
            Some(row) => plan.reused.push(ReusedParagraph {
                existing: row,
                incoming: chunk,
                text_changed: true,
            }),
            None => plan.inserts.push(chunk),
        }
    }

    plan.deletes = by_id.into_values().collect();
    plan.deletes.sort_by_key(|row| row.paragraph_index);
    plan
}

#[cfg(test)]
mod tests {
    use common::utils::hashing::content_hash;

    use super::*;

    fn row(document_id: &str, index: usize, text: &str) -> Paragraph {
        Paragraph::new(
            document_id,
            index,
            text.to_string(),
            content_hash(text, document_id),
            None,
            BlockType::Paragraph,
        )
        .with_embedding(&[0.1, 0.2], "model-x")
    }

    fn chunk(document_id: &str, index: usize, text: &str) -> NewChunk {
        NewChunk {
            id: Paragraph::make_id(document_id, text),
            paragraph_index: index,
            text: text.to_string(),
            content_hash: content_hash(text, document_id),
            heading: None,
            blocktype: BlockType::Paragraph,
            marker_failed: false,
        }
    }

    #[test]
    fn unchanged_set_is_a_noop() {
        let existing = vec![row("d", 0, "Para one."), row("d", 1, "Para two.")];
        let chunks = vec![chunk("d", 0, "Para one."), chunk("d", 1, "Para two.")];
        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 2);
        assert!(plan.inserts.is_empty());
        assert!(plan.deletes.is_empty());
        assert!(plan.is_noop());
    }

    #[test]
    fn insert_in_middle_reuses_neighbors() {
        let existing = vec![row("d", 0, "Para one."), row("d", 1, "Para two.")];
        let chunks = vec![
            chunk("d", 0, "Para one."),
            chunk("d", 1, "Brand new middle."),
            chunk("d", 2, "Para two."),
        ];
        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 2);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].text, "Brand new middle.");
        assert!(plan.deletes.is_empty());

        // Para one sits still; Para two shifts from index 1 to 2.
        let moved: Vec<_> = plan.reused.iter().filter(|r| r.needs_update()).collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].incoming.paragraph_index, 2);
        assert!(!moved[0].text_changed);
    }

    #[test]
    fn reorder_updates_indices_without_reembedding() {
        let existing = vec![row("d", 0, "Para one."), row("d", 1, "Para two.")];
        let chunks = vec![chunk("d", 0, "Para two."), chunk("d", 1, "Para one.")];
        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 2);
        assert!(plan.inserts.is_empty());
        assert!(plan.deletes.is_empty());
        assert!(plan.reused.iter().all(|r| r.needs_update()));
        assert!(plan.reused.iter().all(|r| !r.text_changed));
    }

    #[test]
    fn dropped_paragraph_is_deleted() {
        let existing = vec![row("d", 0, "Para one."), row("d", 1, "Para two.")];
        let chunks = vec![chunk("d", 0, "Para one.")];
        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 1);
        assert_eq!(plan.deletes.len(), 1);
        assert_eq!(plan.deletes[0].text, "Para two.");
    }

    #[test]
    fn marker_rewrite_matches_by_id_and_keeps_embedding() {
        let existing = vec![row("d", 0, "Para one. Still here.")];
        // Same words, different raw text: markers inserted.
        let rewritten = "⁅s1⁆Para one.⁅/s1⁆ ⁅s2⁆Still here.⁅/s2⁆";
        let chunks = vec![chunk("d", 0, rewritten)];
        assert_eq!(chunks[0].id, existing[0].id);

        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 1);
        assert!(plan.reused[0].text_changed);
        assert!(plan.inserts.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn rewritten_text_becomes_insert_plus_delete() {
        let existing = vec![row("d", 0, "Old words entirely.")];
        let chunks = vec![chunk("d", 0, "New words entirely.")];
        let plan = reconcile(existing, chunks);
        assert!(plan.reused.is_empty());
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn duplicate_texts_pair_one_to_one() {
        let existing = vec![
            row("d", 0, "Repeated refrain."),
            row("d", 1, "Repeated refrain."),
        ];
        let chunks = vec![chunk("d", 0, "Repeated refrain.")];
        let plan = reconcile(existing, chunks);
        assert_eq!(plan.reused.len(), 1);
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn heading_change_is_an_update_not_a_rewrite() {
        let existing = vec![row("d", 0, "Para one.")];
        let mut incoming = chunk("d", 0, "Para one.");
        incoming.heading = Some("New Chapter".to_string());
        let plan = reconcile(existing, vec![incoming]);
        assert_eq!(plan.reused.len(), 1);
        assert!(plan.reused[0].needs_update());
        assert!(!plan.reused[0].text_changed);
        assert!(plan.inserts.is_empty());
    }
}

use sha2::{Digest, Sha256};

use super::markers::normalize_text;

/// Hash of a whole source file, bytes as read from disk.
pub fn file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash of a markdown body with frontmatter already split off.
pub fn body_hash(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// The embedding cache key: a digest over the paragraph text and its
/// disambiguating context, both trimmed, joined by a separator that cannot
/// occur in either.
pub fn content_hash(text: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hasher.update(b"|||");
    hasher.update(context.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Twelve hex characters over the normalized (marker-stripped,
/// whitespace-collapsed) text. Paragraph ids are built from this so that
/// re-segmentation that preserves the words keeps the id.
pub fn short_hash(text: &str) -> String {
    let normalized = normalize_text(text);
    let digest = format!("{:x}", Sha256::digest(normalized.as_bytes()));
    digest.chars().take(12).collect()
}

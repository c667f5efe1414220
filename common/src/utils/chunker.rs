use super::config::ChunkerOptions;
use super::markers::split_sentences;

/// Paragraph-level unit emitted by the chunker, carrying the nearest
/// preceding markdown heading and a coarse block classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub heading: Option<String>,
    pub blocktype: BlockType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Paragraph,
    Heading,
    Quote,
    Verse,
    Noise,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::Quote => "quote",
            Self::Verse => "verse",
            Self::Noise => "noise",
        }
    }
}

/// Split a body into chunk strings within the configured size bounds.
///
/// Rules, in order: blank-line split into candidates, short candidates
/// dropped, fitting candidates emitted as-is, oversized candidates packed
/// sentence by sentence with a whole-word-aligned overlap tail carried into
/// the following chunk, and single oversized sentences hard-split at the
/// max-chunk character boundary. Sentence boundaries beat size; size beats
/// word boundaries; word boundaries beat character boundaries.
pub fn chunk(body: &str, options: &ChunkerOptions) -> Vec<String> {
    chunk_blocks(body, options)
        .into_iter()
        .map(|block| block.text)
        .collect()
}

/// As [`chunk`], with heading context and blocktype attached to each chunk.
pub fn chunk_blocks(body: &str, options: &ChunkerOptions) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut heading: Option<String> = None;

    for candidate in split_candidates(body) {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(text) = heading_text(trimmed) {
            // Headings update context for the chunks that follow; a heading
            // long enough to stand alone is also emitted as its own block.
            if char_len(trimmed) >= options.min_chunk {
                blocks.push(Block {
                    text: trimmed.to_string(),
                    heading: Some(text.clone()),
                    blocktype: BlockType::Heading,
                });
            }
            heading = Some(text);
            continue;
        }

        if char_len(trimmed) < options.min_chunk {
            continue;
        }

        let blocktype = classify(trimmed);
        if char_len(trimmed) <= options.max_chunk {
            blocks.push(Block {
                text: trimmed.to_string(),
                heading: heading.clone(),
                blocktype,
            });
            continue;
        }

        for piece in pack_sentences(trimmed, options) {
            blocks.push(Block {
                text: piece,
                heading: heading.clone(),
                blocktype,
            });
        }
    }

    blocks
}

/// Candidate paragraphs: runs of two or more newlines are separators.
fn split_candidates(body: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut start = 0usize;
    let bytes = body.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let run_start = i;
            let mut newlines = 0usize;
            while i < bytes.len() && (bytes[i] == b'\n' || bytes[i] == b'\r') {
                if bytes[i] == b'\n' {
                    newlines += 1;
                }
                i += 1;
            }
            if newlines >= 2 {
                candidates.push(&body[start..run_start]);
                start = i;
            }
        } else {
            i += 1;
        }
    }
    if start < body.len() {
        candidates.push(&body[start..]);
    }
    candidates
}

/// Greedy sentence packing for a candidate above the max-chunk bound.
fn pack_sentences(text: &str, options: &ChunkerOptions) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for range in split_sentences(text) {
        let sentence = text[range].trim();
        if sentence.is_empty() {
            continue;
        }

        if char_len(sentence) > options.max_chunk {
            // A single runaway sentence: flush what we have and hard-split.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(hard_split(sentence, options.max_chunk));
            continue;
        }

        let joined = if current.is_empty() {
            char_len(sentence)
        } else {
            char_len(&current) + 1 + char_len(sentence)
        };

        if joined > options.max_chunk && !current.is_empty() {
            let tail = overlap_tail(&current, options.overlap);
            chunks.push(std::mem::take(&mut current));
            current = tail;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Up to `overlap` trailing characters of the previous chunk, advanced to
/// the next word boundary so the tail never starts mid-word.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return String::new();
    }
    let mut i = chars.len() - overlap;
    while i < chars.len() && !chars[i].is_whitespace() {
        i += 1;
    }
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    chars[i..].iter().collect()
}

/// Last resort: fixed-width split at character (not byte) boundaries.
fn hard_split(sentence: &str, max_chunk: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_chunk.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn heading_text(candidate: &str) -> Option<String> {
    let first_line = candidate.lines().next()?;
    let hashes = first_line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 || candidate.lines().count() > 1 {
        return None;
    }
    let text = first_line[hashes..].trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Coarse block classification over the candidate's lines.
fn classify(candidate: &str) -> BlockType {
    let lines: Vec<&str> = candidate.lines().filter(|l| !l.trim().is_empty()).collect();
    if !lines.is_empty() && lines.iter().all(|l| l.trim_start().starts_with('>')) {
        return BlockType::Quote;
    }

    let letters = candidate.chars().filter(|c| c.is_alphabetic()).count();
    let non_ws = candidate.chars().filter(|c| !c.is_whitespace()).count();
    if non_ws > 0 && letters * 4 < non_ws {
        return BlockType::Noise;
    }

    // Verse: several short lines, most without terminal punctuation.
    if lines.len() >= 3 {
        let short = lines.iter().filter(|l| l.chars().count() < 60).count();
        if short * 10 >= lines.len() * 8 {
            return BlockType::Verse;
        }
    }

    BlockType::Paragraph
}

use std::ops::Range;
use std::time::Duration;

use tracing::debug;

use common::error::AppError;
use common::utils::markers::{insert_sentence_markers, verify_round_trip};

use super::instructions::{
    PARAGRAPH_SYSTEM_MESSAGE, PHRASE_SYSTEM_MESSAGE, SENTENCE_SYSTEM_MESSAGE,
};
use super::{complete_text, parse_index_list};

/// Sentence segmentation for text without terminal punctuation, produced by
/// a language model through the phrase → sentence (→ paragraph) protocol.
pub struct LlmSegmenter {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl LlmSegmenter {
    pub fn new(
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            timeout,
        }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, AppError> {
        tokio::time::timeout(
            self.timeout,
            complete_text(&self.client, &self.model, system, user),
        )
        .await
        .map_err(|_| {
            AppError::DeadlineExceeded(format!(
                "segmentation model call exceeded {}s",
                self.timeout.as_secs()
            ))
        })?
    }

    /// Produce a sentence-marked copy of `text`, verified against the
    /// round-trip invariant before being returned.
    pub async fn mark_sentences(&self, text: &str) -> Result<String, AppError> {
        let words = word_ranges(text);
        if words.is_empty() {
            return Ok(text.to_string());
        }

        // Stage one: phrase-final word indices over the numbered passage.
        let numbered = number_words(text, &words);
        let reply = self.ask(PHRASE_SYSTEM_MESSAGE, numbered).await?;
        let phrase_ends = clamp_boundaries(parse_index_list(&reply), words.len());
        debug!(phrases = phrase_ends.len(), "phrase identification done");

        // Stage two: sentence-final phrase indices over the phrase list.
        let phrase_ranges = spans_from_ends(&phrase_ends, &words);
        let listing = numbered_listing(text, &phrase_ranges);
        let reply = self.ask(SENTENCE_SYSTEM_MESSAGE, listing).await?;
        let sentence_ends = clamp_boundaries(parse_index_list(&reply), phrase_ranges.len());

        // Map sentence-final phrases back to word indices, then to spans.
        let word_ends: Vec<usize> = sentence_ends
            .iter()
            .map(|&phrase_idx| phrase_ends[phrase_idx - 1])
            .collect();
        let sentence_ranges = spans_from_ends(&word_ends, &words);

        let marked = insert_sentence_markers(text, &sentence_ranges);
        if !verify_round_trip(text, &marked) {
            return Err(AppError::ValidationFailed(format!(
                "model segmentation failed round trip for paragraph starting {:?}",
                text.chars().take(32).collect::<String>()
            )));
        }
        Ok(marked)
    }

    /// Stage three, for full re-ingestion: indices (1-based) of sentences
    /// that start a new paragraph. The first paragraph always starts at
    /// sentence 1.
    pub async fn paragraph_starts(&self, sentences: &[String]) -> Result<Vec<usize>, AppError> {
        if sentences.len() <= 1 {
            return Ok(vec![1]);
        }
        let listing = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n");
        let reply = self.ask(PARAGRAPH_SYSTEM_MESSAGE, listing).await?;
        let mut starts: Vec<usize> = parse_index_list(&reply)
            .into_iter()
            .filter(|&i| i >= 1 && i <= sentences.len())
            .collect();
        if starts.first() != Some(&1) {
            starts.insert(0, 1);
        }
        starts.dedup();
        Ok(starts)
    }
}

/// Byte ranges of the whitespace-separated words of `text`.
pub(crate) fn word_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                ranges.push(s..idx);
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        ranges.push(s..text.len());
    }
    ranges
}

/// Unicode subscript digits for a 1-based word index.
pub(crate) fn subscript(n: usize) -> String {
    n.to_string()
        .chars()
        .map(|c| match c {
            '0' => '₀',
            '1' => '₁',
            '2' => '₂',
            '3' => '₃',
            '4' => '₄',
            '5' => '₅',
            '6' => '₆',
            '7' => '₇',
            '8' => '₈',
            _ => '₉',
        })
        .collect()
}

/// The passage with every word suffixed by its subscript index.
pub(crate) fn number_words(text: &str, words: &[Range<usize>]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, range)| format!("{}{}", &text[range.clone()], subscript(i + 1)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sanitize model-returned boundary indices: keep them in range, sorted,
/// and always close the final span.
pub(crate) fn clamp_boundaries(mut ends: Vec<usize>, len: usize) -> Vec<usize> {
    ends.retain(|&i| i >= 1 && i <= len);
    if ends.last() != Some(&len) {
        ends.push(len);
    }
    ends
}

/// Turn 1-based final-word indices into byte spans over the original text.
pub(crate) fn spans_from_ends(ends: &[usize], words: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut spans = Vec::with_capacity(ends.len());
    let mut start_word = 0usize;
    for &end in ends {
        let end_word = end - 1;
        spans.push(words[start_word].start..words[end_word].end);
        start_word = end;
    }
    spans
}

/// Numbered listing of text spans, one per line, for the later stages.
pub(crate) fn numbered_listing(text: &str, spans: &[Range<usize>]) -> String {
    spans
        .iter()
        .enumerate()
        .map(|(i, span)| format!("{}. {}", i + 1, &text[span.clone()]))
        .collect::<Vec<_>>()
        .join("\n")
}

use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;

/// Matches sentence and phrase markers: `⁅s1⁆`, `⁅/s1⁆`, `⁅ph12⁆`, `⁅/ph12⁆`.
fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"⁅/?(?:s|ph)\d+⁆").expect("marker regex is valid"))
}

/// Remove every sentence/phrase marker, leaving the text otherwise intact.
pub fn strip_markers(text: &str) -> String {
    marker_re().replace_all(text, "").into_owned()
}

/// Strip markers, collapse whitespace runs to single spaces and trim.
/// Two texts that normalize equally carry the same words in the same order.
pub fn normalize_text(text: &str) -> String {
    let stripped = strip_markers(text);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The round-trip invariant: a marked paragraph must normalize back to the
/// pre-marker text. Callers reject the marked string when this fails.
pub fn verify_round_trip(original: &str, marked: &str) -> bool {
    normalize_text(original) == normalize_text(marked)
}

/// Sentence-ending punctuation across the library's scripts: Latin
/// terminators, ellipsis, Arabic question mark and Urdu full stop.
const SENTENCE_TERMINATORS: [char; 6] = ['.', '!', '?', '؟', '۔', '…'];

/// Whether rule-based segmentation has anything to work with.
pub fn has_sentence_punctuation(text: &str) -> bool {
    text.chars().any(|c| SENTENCE_TERMINATORS.contains(&c))
}

/// Split into sentences after terminal punctuation followed by whitespace.
/// Returns byte ranges over the input; the final unterminated tail is its
/// own sentence. Ranges cover the input exactly, in order.
pub fn split_sentences(text: &str) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            // Consume any run of closing punctuation ("?!", "…") first.
            let mut end = idx + ch.len_utf8();
            while let Some(&(next_idx, next_ch)) = chars.peek() {
                if SENTENCE_TERMINATORS.contains(&next_ch) || next_ch == '"' || next_ch == '\'' {
                    end = next_idx + next_ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            match chars.peek() {
                Some(&(_, next_ch)) if next_ch.is_whitespace() => {
                    ranges.push(start..end);
                    // Skip the whitespace run; the next sentence starts after it.
                    while let Some(&(ws_idx, ws_ch)) = chars.peek() {
                        if ws_ch.is_whitespace() {
                            chars.next();
                            start = ws_idx + ws_ch.len_utf8();
                        } else {
                            start = ws_idx;
                            break;
                        }
                    }
                }
                None => {
                    ranges.push(start..end);
                    start = end;
                }
                _ => {}
            }
        }
    }

    if start < text.len() && !text[start..].trim().is_empty() {
        ranges.push(start..text.len());
    }

    ranges
}

/// Wrap each sentence range in numbered markers, `⁅s1⁆…⁅/s1⁆` onward.
/// Whitespace between ranges is preserved outside the markers.
pub fn insert_sentence_markers(text: &str, ranges: &[std::ops::Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len() + ranges.len() * 12);
    let mut cursor = 0usize;
    for (n, range) in ranges.iter().enumerate() {
        if range.start > cursor {
            out.push_str(&text[cursor..range.start]);
        }
        out.push_str(&format!("⁅s{}⁆", n + 1));
        out.push_str(&text[range.clone()]);
        out.push_str(&format!("⁅/s{}⁆", n + 1));
        cursor = range.end;
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }
    out
}

/// Rule-based segmentation for punctuated text. Errors with
/// `validation_failed` when the marked string fails the round trip, which
/// callers treat as paragraph-local.
pub fn mark_sentences(text: &str) -> Result<String, AppError> {
    let ranges = split_sentences(text);
    if ranges.is_empty() {
        return Ok(text.to_string());
    }
    let marked = insert_sentence_markers(text, &ranges);
    if !verify_round_trip(text, &marked) {
        return Err(AppError::ValidationFailed(format!(
            "sentence markers failed round trip for paragraph starting {:?}",
            text.chars().take(32).collect::<String>()
        )));
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_sentence_and_phrase_markers() {
        let marked = "⁅s1⁆One.⁅/s1⁆ ⁅s2⁆⁅ph1⁆Two⁅/ph1⁆ ⁅ph2⁆halves⁅/ph2⁆.⁅/s2⁆";
        assert_eq!(strip_markers(marked), "One. Two halves.");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a\n\n b\tc "), "a b c");
    }

    #[test]
    fn split_sentences_basic() {
        let text = "First one. Second one! Third?";
        let ranges = split_sentences(text);
        let sentences: Vec<&str> = ranges.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(sentences, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn split_sentences_arabic_terminators() {
        let text = "جملة أولى۔ جملة ثانية؟";
        let ranges = split_sentences(text);
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn split_sentences_unterminated_tail() {
        let text = "Complete. And a tail without punctuation";
        let ranges = split_sentences(text);
        let sentences: Vec<&str> = ranges.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(
            sentences,
            vec!["Complete.", "And a tail without punctuation"]
        );
    }

    #[test]
    fn mark_sentences_round_trips() {
        let text = "First one. Second one! Third?";
        let marked = mark_sentences(text).expect("marking succeeds");
        assert_eq!(marked, "⁅s1⁆First one.⁅/s1⁆ ⁅s2⁆Second one!⁅/s2⁆ ⁅s3⁆Third?⁅/s3⁆");
        assert!(verify_round_trip(text, &marked));
    }

    #[test]
    fn mark_sentences_numbering_starts_at_one() {
        let marked = mark_sentences("Only sentence.").expect("marking succeeds");
        assert_eq!(marked, "⁅s1⁆Only sentence.⁅/s1⁆");
    }

    #[test]
    fn round_trip_detects_word_loss() {
        assert!(!verify_round_trip("one two three", "⁅s1⁆one two⁅/s1⁆"));
    }

    #[test]
    fn ellipsis_and_quotes_stay_with_their_sentence() {
        let text = "He paused… Then spoke.";
        let ranges = split_sentences(text);
        let sentences: Vec<&str> = ranges.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(sentences, vec!["He paused…", "Then spoke."]);
    }
}

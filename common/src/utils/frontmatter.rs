use std::collections::BTreeMap;

/// Split a markdown source into frontmatter metadata and body.
///
/// Only a leading `---` fence pair is recognized. Inside it, `key: value`
/// lines are collected with surrounding single or double quotes stripped
/// from the value; anything else is skipped. Without a leading fence the
/// metadata is empty and the body is the input unchanged.
///
/// Some historical sources carry two consecutive frontmatter blocks; the
/// first block wins and the second is left in the body for the cleanup
/// utility that lives outside this core.
pub fn split_frontmatter(input: &str) -> (BTreeMap<String, String>, &str) {
    let mut metadata = BTreeMap::new();

    let Some(after_open) = input
        .strip_prefix("---\n")
        .or_else(|| input.strip_prefix("---\r\n"))
    else {
        return (metadata, input);
    };

    let Some(close) = find_closing_fence(after_open) else {
        return (metadata, input);
    };

    for line in after_open[..close.block_end].lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        metadata.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }

    (metadata, &after_open[close.body_start..])
}

struct Fence {
    block_end: usize,
    body_start: usize,
}

/// Locate the closing `---` line within the text following the opening
/// fence. Returns the byte offset where the metadata block ends and where
/// the body begins.
fn find_closing_fence(text: &str) -> Option<Fence> {
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" {
            return Some(Fence {
                block_end: offset,
                body_start: offset + line.len(),
            });
        }
        offset += line.len();
    }
    None
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

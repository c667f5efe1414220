use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;

use crate::error::AppError;

/// Doctrinal-weight configuration document. Per-religion defaults,
/// per-(religion, collection) overrides, and optional per-author pins that
/// beat both.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthorityConfig {
    #[serde(default = "neutral_default")]
    pub default: i64,
    #[serde(default)]
    pub religions: HashMap<String, ReligionAuthority>,
    #[serde(default)]
    pub authors: HashMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReligionAuthority {
    #[serde(default = "neutral_default")]
    pub default: i64,
    #[serde(default)]
    pub collections: HashMap<String, i64>,
}

fn neutral_default() -> i64 {
    5
}

/// Maps `(author, religion, collection)` to a rank in 1..=10. Reloadable at
/// runtime; rescoring never touches embeddings.
pub struct AuthorityScorer {
    path: Option<PathBuf>,
    config: RwLock<AuthorityConfig>,
}

impl AuthorityScorer {
    /// Load the scorer from a JSON config document on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let config = read_config(&path)?;
        Ok(Self {
            path: Some(path),
            config: RwLock::new(config),
        })
    }

    /// Build a scorer around an in-memory config. Missing config files fall
    /// back to this with defaults, and tests use it directly.
    pub fn from_config(config: AuthorityConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    /// Re-read the config document. Scores served between the write and the
    /// next `score` call are whichever version the lock hands out.
    pub fn reload(&self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = read_config(path)?;
        let mut guard = self
            .config
            .write()
            .map_err(|_| AppError::InternalError("authority config lock poisoned".into()))?;
        *guard = fresh;
        Ok(())
    }

    /// Score a document. Author pins win, then (religion, collection)
    /// overrides, then the religion default, then the global default.
    /// Always clamped into 1..=10.
    pub fn score(&self, author: &str, religion: &str, collection: &str) -> u8 {
        let guard = match self.config.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let raw = guard
            .authors
            .get(&fold(author))
            .copied()
            .or_else(|| {
                guard.religions.get(&fold(religion)).map(|r| {
                    r.collections
                        .get(&fold(collection))
                        .copied()
                        .unwrap_or(r.default)
                })
            })
            .unwrap_or(guard.default);

        clamp_rank(raw)
    }
}

fn fold(key: &str) -> String {
    key.trim().to_lowercase()
}

fn clamp_rank(raw: i64) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        raw.clamp(1, 10) as u8
    }
}

fn read_config(path: &Path) -> Result<AuthorityConfig, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::InputInvalid(format!("authority config {}: {e}", path.display()))
    })?;
    let mut config: AuthorityConfig = serde_json::from_str(&raw)
        .map_err(|e| AppError::InputInvalid(format!("authority config parse: {e}")))?;

    // Keys are matched case-insensitively; fold once at load time.
    config.religions = config
        .religions
        .into_iter()
        .map(|(religion, mut entry)| {
            entry.collections = entry
                .collections
                .into_iter()
                .map(|(collection, rank)| (fold(&collection), rank))
                .collect();
            (fold(&religion), entry)
        })
        .collect();
    config.authors = config
        .authors
        .into_iter()
        .map(|(author, rank)| (fold(&author), rank))
        .collect();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn sample_config() -> AuthorityConfig {
        serde_json::from_value(serde_json::json!({
            "default": 5,
            "religions": {
                "bahai": {
                    "default": 7,
                    "collections": { "core": 10, "commentary": 6 }
                },
                "islam": { "default": 6, "collections": {} }
            },
            "authors": { "the bab": 9 }
        }))
        .expect("sample config deserializes")
    }

    #[test]
    fn collection_override_beats_religion_default() {
        let scorer = AuthorityScorer::from_config(sample_config());
        assert_eq!(scorer.score("Anonymous", "bahai", "core"), 10);
        assert_eq!(scorer.score("Anonymous", "bahai", "commentary"), 6);
    }

    #[test]
    fn unknown_collection_inherits_religion_default() {
        let scorer = AuthorityScorer::from_config(sample_config());
        assert_eq!(scorer.score("Anonymous", "bahai", "letters"), 7);
        assert_eq!(scorer.score("Anonymous", "islam", "hadith"), 6);
    }

    #[test]
    fn unknown_religion_falls_back_to_neutral() {
        let scorer = AuthorityScorer::from_config(sample_config());
        assert_eq!(scorer.score("Anonymous", "unlisted", "whatever"), 5);
    }

    #[test]
    fn author_pin_wins() {
        let scorer = AuthorityScorer::from_config(sample_config());
        assert_eq!(scorer.score("The Bab", "unlisted", "whatever"), 9);
    }

    #[test]
    fn scores_are_clamped_into_range() {
        let config: AuthorityConfig = serde_json::from_value(serde_json::json!({
            "default": 99,
            "religions": { "low": { "default": -3, "collections": {} } }
        }))
        .expect("config");
        let scorer = AuthorityScorer::from_config(config);
        assert_eq!(scorer.score("a", "anything", "c"), 10);
        assert_eq!(scorer.score("a", "low", "c"), 1);
    }

    #[test]
    fn reload_picks_up_changes() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "default": 4 }}"#).expect("write config");
        let scorer = AuthorityScorer::load(file.path()).expect("load");
        assert_eq!(scorer.score("a", "b", "c"), 4);

        file.as_file()
            .set_len(0)
            .expect("truncate config before rewrite");
        let mut handle = file.reopen().expect("reopen");
        write!(handle, r#"{{ "default": 8 }}"#).expect("rewrite config");
        scorer.reload().expect("reload");
        assert_eq!(scorer.score("a", "b", "c"), 8);
    }
}

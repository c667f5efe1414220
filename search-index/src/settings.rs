use serde_json::{json, Value};

/// The engine's base ranking rules, in order.
pub const BASE_RANKING_RULES: [&str; 6] =
    ["words", "typo", "proximity", "attribute", "sort", "exactness"];

/// The authority rule injected into the base list.
pub const AUTHORITY_RULE: &str = "authority:desc";

/// Build the ranking rules with `authority:desc` inserted at `position`
/// (1-based, clamped into 1..=7). The default position 4 puts authority
/// behind textual match quality but ahead of attribute weighting.
pub fn ranking_rules(position: usize) -> Vec<String> {
    let position = position.clamp(1, BASE_RANKING_RULES.len() + 1);
    let mut rules: Vec<String> = BASE_RANKING_RULES.iter().map(ToString::to_string).collect();
    rules.insert(position - 1, AUTHORITY_RULE.to_string());
    rules
}

/// Settings payload for the paragraph index.
pub fn paragraph_settings(authority_position: usize, dimensions: usize) -> Value {
    json!({
        "searchableAttributes": ["text", "heading", "title", "author"],
        "filterableAttributes": [
            "document_id", "religion", "collection", "language", "year",
            "paragraph_index", "blocktype", "author", "title", "authority"
        ],
        "sortableAttributes": ["year", "created_at", "paragraph_index", "authority"],
        "rankingRules": ranking_rules(authority_position),
        "embedders": {
            "default": {
                "source": "userProvided",
                "dimensions": dimensions,
            }
        }
    })
}

/// Settings payload for the document index: the metadata mirror.
pub fn document_settings(authority_position: usize) -> Value {
    json!({
        "searchableAttributes": ["title", "author", "description"],
        "filterableAttributes": [
            "religion", "collection", "language", "year", "author", "authority"
        ],
        "sortableAttributes": ["year", "created_at", "authority"],
        "rankingRules": ranking_rules(authority_position),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_rule_lands_at_requested_position() {
        for position in 1..=7 {
            let rules = ranking_rules(position);
            assert_eq!(rules.len(), 7);
            assert_eq!(rules[position - 1], AUTHORITY_RULE, "position {position}");

            // The remaining six entries are the base list in order.
            let rest: Vec<&str> = rules
                .iter()
                .filter(|r| r.as_str() != AUTHORITY_RULE)
                .map(String::as_str)
                .collect();
            assert_eq!(rest, BASE_RANKING_RULES);
        }
    }

    #[test]
    fn default_position_is_after_proximity() {
        let rules = ranking_rules(4);
        assert_eq!(
            rules,
            vec!["words", "typo", "proximity", "authority:desc", "attribute", "sort", "exactness"]
        );
    }

    #[test]
    fn out_of_range_positions_are_clamped() {
        assert_eq!(ranking_rules(0)[0], AUTHORITY_RULE);
        assert_eq!(ranking_rules(99)[6], AUTHORITY_RULE);
    }

    #[test]
    fn paragraph_settings_carry_embedder_dimension() {
        let settings = paragraph_settings(4, 1536);
        assert_eq!(settings["embedders"]["default"]["dimensions"], 1536);
        assert_eq!(settings["embedders"]["default"]["source"], "userProvided");
        assert_eq!(settings["rankingRules"][3], "authority:desc");
    }
}

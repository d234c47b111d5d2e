//! Fenced block extraction from generated text

use crate::config::CandidateMode;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    // Opening fence with optional language tag, body up to the next fence.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("valid fence pattern");
}

/// One statement extracted from a generated response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCandidate {
    sql: String,
}

impl QueryCandidate {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for QueryCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Bodies of every fenced block tagged `lang` (case-insensitive), in source order.
pub fn extract_blocks(text: &str, lang: &str) -> Vec<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter(|caps| caps[1].eq_ignore_ascii_case(lang))
        .map(|caps| caps[2].trim().to_string())
        .collect()
}

/// Bodies of every fenced block regardless of tag.
pub fn extract_any_blocks(text: &str) -> Vec<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .map(|caps| caps[2].trim().to_string())
        .collect()
}

/// One candidate per ```sql block.
pub fn extract_sql(text: &str) -> Vec<QueryCandidate> {
    extract_blocks(text, "sql")
        .into_iter()
        .map(QueryCandidate::new)
        .collect()
}

/// The authoritative block is the last one.
pub fn last_block(text: &str, lang: &str) -> Option<String> {
    extract_blocks(text, lang).pop()
}

pub fn select_candidates(mut candidates: Vec<QueryCandidate>, mode: CandidateMode) -> Vec<QueryCandidate> {
    match mode {
        CandidateMode::All => candidates,
        CandidateMode::LastOnly => candidates.pop().into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_block() {
        let text = "Here you go:\n```sql\nSELECT COUNT(*) FROM T\n```\n";
        let candidates = extract_sql(text);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sql(), "SELECT COUNT(*) FROM T");
    }

    #[test]
    fn test_extract_multiple_blocks_in_order() {
        let text = "```sql\nSELECT 1\n```\nand\n```SQL\nSELECT 2;\n```\n```python\nprint(1)\n```\n``` sql\nSELECT 3\n```";
        let sql: Vec<String> = extract_sql(text).iter().map(|c| c.sql().to_string()).collect();
        assert_eq!(sql, vec!["SELECT 1", "SELECT 2;", "SELECT 3"]);
    }

    #[test]
    fn test_no_blocks() {
        assert!(extract_sql("SELECT 1 FROM T").is_empty());
        assert!(extract_sql("```\nSELECT 1\n```").is_empty());
        assert_eq!(last_block("nothing here", "json"), None);
    }

    #[test]
    fn test_last_block_wins() {
        let text = "```json\n{\"a\": 1}\n```\n```json\n{\"a\": 2}\n```";
        assert_eq!(last_block(text, "json").as_deref(), Some("{\"a\": 2}"));
    }

    #[test]
    fn test_select_candidates() {
        let candidates = vec![QueryCandidate::new("SELECT 1"), QueryCandidate::new("SELECT 2")];
        assert_eq!(select_candidates(candidates.clone(), CandidateMode::All).len(), 2);

        let last = select_candidates(candidates, CandidateMode::LastOnly);
        assert_eq!(last, vec![QueryCandidate::new("SELECT 2")]);

        assert!(select_candidates(Vec::new(), CandidateMode::LastOnly).is_empty());
    }
}

//! Input Classifier - routes an utterance to the query or simple-answer path

use crate::context::PromptContext;
use crate::error::{ChatError, Result};
use crate::events::Stage;
use crate::extract;
use crate::llm::TextGenerator;
use crate::prompts::{fill, CLASSIFIER_TEMPLATE};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

lazy_static! {
    static ref NON_PRINTABLE: Regex = Regex::new(r"[^\x20-\x7E]").expect("valid pattern");
}

/// Routing decision for one turn. Derived once and never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_query: bool,
    pub include_chart: bool,
    pub is_simple_answer: bool,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(alias = "is_a_query")]
    is_query: bool,
    include_chart: bool,
    #[serde(alias = "simple_answer")]
    is_simple_answer: bool,
}

impl Classification {
    /// A chart is only kept on the query route; the two routes are exclusive.
    fn normalized(raw: RawClassification) -> Self {
        if raw.include_chart && !raw.is_query {
            warn!("Classifier asked for a chart on a non-query input; dropping chart");
        }
        if raw.is_simple_answer == raw.is_query {
            warn!(
                "Classifier flags disagree (is_query={}, simple_answer={}); routing by is_query",
                raw.is_query, raw.is_simple_answer
            );
        }
        Self {
            is_query: raw.is_query,
            include_chart: raw.include_chart && raw.is_query,
            is_simple_answer: !raw.is_query,
        }
    }
}

/// Strip fences, a `json` tag and non-printable characters, then keep the
/// outermost `{...}` span.
pub fn clean_structured_output(raw: &str) -> String {
    let body = extract::extract_any_blocks(raw)
        .pop()
        .unwrap_or_else(|| raw.to_string());

    let stripped = body.trim().trim_matches('`').trim();
    let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
    let printable = NON_PRINTABLE.replace_all(stripped, "");

    match (printable.find('{'), printable.rfind('}')) {
        (Some(start), Some(end)) if start < end => printable[start..=end].to_string(),
        _ => printable.trim().to_string(),
    }
}

pub fn parse_classification(raw: &str) -> Result<Classification> {
    let cleaned = clean_structured_output(raw);
    let parsed: RawClassification = serde_json::from_str(&cleaned).map_err(|e| {
        ChatError::Classification(format!("Failed to parse classifier output {:?}: {}", raw, e))
    })?;
    Ok(Classification::normalized(parsed))
}

pub struct InputClassifier {
    text: TextGenerator,
}

impl InputClassifier {
    pub fn new(text: TextGenerator) -> Self {
        Self { text }
    }

    pub async fn classify(&self, utterance: &str, context: &PromptContext) -> Result<Classification> {
        let rendered = context.render();
        let prompt = fill(
            CLASSIFIER_TEMPLATE,
            &[("context", rendered.as_str()), ("user_input", utterance)],
        );
        let raw = self.text.generate(Stage::Classification, &prompt).await?;
        let classification = parse_classification(&raw)?;

        info!(
            "🧭 Classified: is_query={} include_chart={}",
            classification.is_query, classification.include_chart
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let c = parse_classification(r#"{"is_a_query": true, "include_chart": true, "simple_answer": false}"#).unwrap();
        assert_eq!(
            c,
            Classification {
                is_query: true,
                include_chart: true,
                is_simple_answer: false
            }
        );
    }

    #[test]
    fn test_parse_fenced_with_noise() {
        let raw = "```json\n{\u{200b}\"is_a_query\": false,\n \"include_chart\": false, \"simple_answer\": true}\n```";
        let c = parse_classification(raw).unwrap();
        assert!(!c.is_query);
        assert!(c.is_simple_answer);
    }

    #[test]
    fn test_parse_backtick_wrapped_tag() {
        let raw = "`json{\"is_query\": true, \"include_chart\": false, \"is_simple_answer\": false}`";
        let c = parse_classification(raw).unwrap();
        assert!(c.is_query);
        assert!(!c.include_chart);
    }

    #[test]
    fn test_chart_requires_query() {
        let c = parse_classification(r#"{"is_a_query": false, "include_chart": true, "simple_answer": true}"#).unwrap();
        assert!(!c.include_chart);
        assert!(c.is_simple_answer);
    }

    #[test]
    fn test_routes_are_exclusive() {
        let c = parse_classification(r#"{"is_a_query": true, "include_chart": false, "simple_answer": true}"#).unwrap();
        assert!(c.is_query);
        assert!(!c.is_simple_answer);
    }

    #[test]
    fn test_rejects_non_json_and_missing_fields() {
        assert!(matches!(
            parse_classification("I think this is a query"),
            Err(ChatError::Classification(_))
        ));
        assert!(matches!(
            parse_classification(r#"{"is_a_query": true}"#),
            Err(ChatError::Classification(_))
        ));
    }
}

//! Query Generation - first attempt and error-feedback regeneration

use crate::context::PromptContext;
use crate::error::Result;
use crate::events::Stage;
use crate::execution_loop::ErrorClassifier;
use crate::extract::{self, QueryCandidate};
use crate::llm::TextGenerator;
use crate::prompts::{fill, ERROR_FEEDBACK_TEMPLATE, QUERY_TEMPLATE};
use tracing::info;

/// Full text of one generation plus the candidates it contains
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedText {
    pub text: String,
    pub candidates: Vec<QueryCandidate>,
}

impl GeneratedText {
    pub fn new(text: String) -> Self {
        let candidates = extract::extract_sql(&text);
        Self { text, candidates }
    }
}

pub struct QueryGenerator {
    text: TextGenerator,
}

impl QueryGenerator {
    pub fn new(text: TextGenerator) -> Self {
        Self { text }
    }

    pub async fn generate(&self, utterance: &str, context: &PromptContext) -> Result<GeneratedText> {
        let rendered = context.render();
        let prompt = fill(
            QUERY_TEMPLATE,
            &[("context", rendered.as_str()), ("user_input", utterance)],
        );
        let generated = GeneratedText::new(self.text.generate(Stage::Query, &prompt).await?);
        info!("Generated {} SQL candidate(s)", generated.candidates.len());
        Ok(generated)
    }
}

/// Regenerates SQL with the previous attempt's failure message in the prompt.
pub struct ErrorFeedbackGenerator {
    text: TextGenerator,
    classifier: ErrorClassifier,
}

impl ErrorFeedbackGenerator {
    pub fn new(text: TextGenerator) -> Self {
        Self {
            text,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn build_prompt(&self, utterance: &str, context: &PromptContext, prior_error: &str) -> String {
        let rendered = context.render();
        let hint = match self.classifier.classify_message(prior_error).hint() {
            Some(hint) => format!("Hint: {}\n", hint),
            None => String::new(),
        };
        fill(
            ERROR_FEEDBACK_TEMPLATE,
            &[
                ("context", rendered.as_str()),
                ("user_input", utterance),
                ("error_feedback", prior_error),
                ("hint", hint.as_str()),
            ],
        )
    }

    pub async fn generate(
        &self,
        utterance: &str,
        context: &PromptContext,
        prior_error: &str,
    ) -> Result<GeneratedText> {
        let prompt = self.build_prompt(utterance, context, prior_error);
        let generated = GeneratedText::new(self.text.generate(Stage::ErrorFeedback, &prompt).await?);
        info!("Regenerated {} SQL candidate(s) from feedback", generated.candidates.len());
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::llm::{GenerationService, TextStream};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixed(&'static str);

    #[async_trait]
    impl GenerationService for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn stream(&self, _prompt: &str) -> Result<TextStream> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(self.0.to_string())])))
        }
    }

    fn context() -> PromptContext {
        PromptContext {
            table_name: "T".to_string(),
            table_description: "test".to_string(),
            columns: Vec::new(),
            variables: Vec::new(),
        }
    }

    fn text(reply: &'static str) -> TextGenerator {
        TextGenerator::new(Arc::new(Fixed(reply)), Duration::from_secs(5), EventSink::disabled())
    }

    #[tokio::test]
    async fn test_query_generator_extracts_candidates() {
        let generator = QueryGenerator::new(text("```sql\nSELECT 1\n```\n```sql\nSELECT 2\n```"));
        let generated = generator.generate("two things", &context()).await.unwrap();
        assert_eq!(generated.candidates.len(), 2);
        assert_eq!(generated.candidates[1].sql(), "SELECT 2");
    }

    #[test]
    fn test_feedback_prompt_contains_error_and_hint() {
        let generator = ErrorFeedbackGenerator::new(text(""));
        let prompt = generator.build_prompt(
            "count patients",
            &context(),
            "SQL compilation error: invalid identifier 'PATIENT_ID'",
        );
        assert!(prompt.contains("invalid identifier 'PATIENT_ID'"));
        assert!(prompt.contains("Hint:"));
        assert!(prompt.contains("count patients"));
    }
}

//! Simple answers for conversational input that needs no data

use crate::error::{ChatError, Result};
use crate::events::Stage;
use crate::llm::TextGenerator;
use crate::prompts::{fill, SIMPLE_ANSWER_TEMPLATE};

pub struct SimpleAnswerGenerator {
    text: TextGenerator,
}

impl SimpleAnswerGenerator {
    pub fn new(text: TextGenerator) -> Self {
        Self { text }
    }

    /// Answer in the user's language. Never touches the data store.
    pub async fn generate(&self, utterance: &str) -> Result<String> {
        let prompt = fill(SIMPLE_ANSWER_TEMPLATE, &[("user_input", utterance)]);
        let answer = self.text.generate(Stage::SimpleAnswer, &prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ChatError::Generation("Empty answer".to_string()));
        }
        Ok(answer.to_string())
    }
}

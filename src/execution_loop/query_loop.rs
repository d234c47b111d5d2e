//! Query Loop
//!
//! Bounded generate/execute/retry cycle. The first attempt uses the plain
//! query prompt; every later attempt is regenerated from the failure message
//! of the attempt right before it.

use crate::config::CandidateMode;
use crate::context::PromptContext;
use crate::error::{ChatError, Result};
use crate::events::{EventSink, PipelineEvent, TurnState};
use crate::execution::{ExecutionResult, QueryExecutor, ResultSet};
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::extract::{self, QueryCandidate};
use crate::generator::{ErrorFeedbackGenerator, GeneratedText, QueryGenerator};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A candidate together with the rows it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub candidate: QueryCandidate,
    pub result_set: ResultSet,
}

/// What happened on one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based
    pub attempt: u32,
    /// Failure message the attempt was generated from, if any
    pub feedback: Option<String>,
    /// Failure message this attempt produced, `None` on success
    pub failure: Option<String>,
    pub class: Option<SqlErrorClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Success {
        generated: GeneratedText,
        results: Vec<CandidateResult>,
    },
    Exhausted {
        last_error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl LoopReport {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

enum AttemptOutcome {
    Succeeded {
        generated: GeneratedText,
        results: Vec<CandidateResult>,
    },
    Failed(String),
}

pub struct QueryLoop {
    query_generator: QueryGenerator,
    feedback_generator: ErrorFeedbackGenerator,
    executor: QueryExecutor,
    classifier: ErrorClassifier,
    max_retries: u32,
    candidate_mode: CandidateMode,
    events: EventSink,
}

impl QueryLoop {
    pub fn new(
        query_generator: QueryGenerator,
        feedback_generator: ErrorFeedbackGenerator,
        executor: QueryExecutor,
        max_retries: u32,
        candidate_mode: CandidateMode,
        events: EventSink,
    ) -> Self {
        Self {
            query_generator,
            feedback_generator,
            executor,
            classifier: ErrorClassifier::new(),
            max_retries,
            candidate_mode,
            events,
        }
    }

    /// Run attempts until one succeeds or `max_retries` have failed.
    ///
    /// `Err` only for failures that end the turn outright: generation
    /// transport errors and an unreachable store.
    pub async fn run(&self, utterance: &str, context: &PromptContext) -> Result<LoopReport> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut feedback: Option<String> = None;

        while (attempts.len() as u32) < self.max_retries {
            let attempt = attempts.len() as u32 + 1;
            info!("Query attempt {} of {}", attempt, self.max_retries);

            match self.attempt(attempt, utterance, context, feedback.as_deref()).await? {
                AttemptOutcome::Succeeded { generated, results } => {
                    info!("✅ Query succeeded on attempt {}", attempt);
                    attempts.push(AttemptRecord {
                        attempt,
                        feedback,
                        failure: None,
                        class: None,
                    });
                    self.events.state(TurnState::Success);
                    return Ok(LoopReport {
                        outcome: LoopOutcome::Success { generated, results },
                        attempts,
                    });
                }
                AttemptOutcome::Failed(message) => {
                    let class = self.classifier.classify_message(&message);
                    warn!("Attempt {} failed [{}]: {}", attempt, class, message);
                    self.events.emit(PipelineEvent::AttemptFailed {
                        attempt,
                        message: message.clone(),
                        class,
                    });
                    attempts.push(AttemptRecord {
                        attempt,
                        feedback: feedback.take(),
                        failure: Some(message.clone()),
                        class: Some(class),
                    });
                    feedback = Some(message);

                    if attempt < self.max_retries {
                        self.events.state(TurnState::Retry { attempt });
                    }
                }
            }
        }

        warn!("Max retries ({}) exhausted", self.max_retries);
        self.events.state(TurnState::Exhausted);
        Ok(LoopReport {
            outcome: LoopOutcome::Exhausted {
                last_error: feedback.unwrap_or_default(),
            },
            attempts,
        })
    }

    async fn attempt(
        &self,
        attempt: u32,
        utterance: &str,
        context: &PromptContext,
        feedback: Option<&str>,
    ) -> Result<AttemptOutcome> {
        self.events.state(TurnState::Querying { attempt });

        let generated = match feedback {
            None => self.query_generator.generate(utterance, context).await,
            Some(message) => self.feedback_generator.generate(utterance, context, message).await,
        };
        let generated = match generated {
            Ok(generated) => generated,
            Err(ChatError::Timeout(msg)) => return Ok(AttemptOutcome::Failed(msg)),
            Err(e) => return Err(e),
        };

        let candidates = extract::select_candidates(generated.candidates.clone(), self.candidate_mode);
        if candidates.is_empty() {
            return Ok(AttemptOutcome::Failed(
                "The response contained no ```sql block; wrap the query in a ```sql fenced block".to_string(),
            ));
        }

        self.events.state(TurnState::Executing { attempt });

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.executor.execute(&candidate).await? {
                ExecutionResult::Rows(result_set) => results.push(CandidateResult {
                    candidate,
                    result_set,
                }),
                ExecutionResult::Failed(error) => return Ok(AttemptOutcome::Failed(error.message)),
            }
        }

        Ok(AttemptOutcome::Succeeded { generated, results })
    }
}

//! Orchestrator - drives one conversational turn end to end
//!
//! ```text
//! CLASSIFYING ─► SIMPLE ─────────────────────────────────► DONE
//!      │
//!      └─► QUERYING ─► EXECUTING ─► SUCCESS ─► [CHARTING] ─► DONE
//!             ▲            │
//!             └── RETRY ◄──┘ ─► EXHAUSTED ─► DONE
//! ```
//!
//! The classification is computed once per turn and every later step reads
//! it. Failures inside the retry loop are recovered; failures outside it end
//! the turn with a user-facing message.

use crate::chart::{ChartArtifact, ChartGenerator, ChartRenderer};
use crate::classifier::{Classification, InputClassifier};
use crate::config::PipelineConfig;
use crate::context::{ContextBuilder, PromptContext};
use crate::error::{ChatError, Result};
use crate::events::{EventSink, PipelineEvent, TurnState};
use crate::execution::{QueryExecutor, Warehouse};
use crate::execution_loop::{CandidateResult, LoopOutcome, QueryLoop};
use crate::generator::{ErrorFeedbackGenerator, QueryGenerator};
use crate::history::{self, HistoryStore, InteractionLog};
use crate::llm::{GenerationService, TextGenerator};
use crate::session::{ConversationSession, ConversationTurn};
use crate::simple::SimpleAnswerGenerator;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ChartStatus {
    NotRequested,
    Rendered(ChartArtifact),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Simple {
        answer: String,
    },
    Answered {
        results: Vec<CandidateResult>,
        chart: ChartStatus,
        attempts: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn_id: Uuid,
    pub classification: Classification,
    pub outcome: TurnOutcome,
}

pub struct Orchestrator {
    context: ContextBuilder,
    classifier: InputClassifier,
    simple: SimpleAnswerGenerator,
    query_loop: QueryLoop,
    chart_generator: ChartGenerator,
    renderer: ChartRenderer,
    history: Option<Arc<dyn HistoryStore>>,
    interaction_log: Option<InteractionLog>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn GenerationService>,
        warehouse: Arc<dyn Warehouse>,
        config: &PipelineConfig,
        events: EventSink,
    ) -> Self {
        let text = TextGenerator::new(llm, config.generation_timeout(), events.clone());

        let query_loop = QueryLoop::new(
            QueryGenerator::new(text.clone()),
            ErrorFeedbackGenerator::new(text.clone()),
            QueryExecutor::new(warehouse.clone(), config.execution_timeout()),
            config.max_retries,
            config.candidate_mode,
            events.clone(),
        );

        Self {
            context: ContextBuilder::new(
                warehouse,
                config.table_name.clone(),
                config.table_description.clone(),
                config.metadata_query.clone(),
            ),
            classifier: InputClassifier::new(text.clone()),
            simple: SimpleAnswerGenerator::new(text.clone()),
            query_loop,
            chart_generator: ChartGenerator::new(text, config.prompt_row_limit),
            renderer: ChartRenderer::new(),
            history: None,
            interaction_log: None,
            events,
        }
    }

    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn with_interaction_log(mut self, log: InteractionLog) -> Self {
        self.interaction_log = Some(log);
        self
    }

    pub fn history(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history.as_ref()
    }

    /// Process one user message against `session`.
    ///
    /// On `Err` the session still gains the user turn and an assistant turn
    /// carrying [`ChatError::user_message`]; no partial result is stored.
    pub async fn handle_turn(&self, session: &mut ConversationSession, utterance: &str) -> Result<TurnReport> {
        let turn_id = Uuid::new_v4();
        info!("💬 Turn {} on session {}", turn_id, session.id);
        session.push(ConversationTurn::user(utterance))?;

        let result = self.run_turn(session, utterance, turn_id).await;

        if let Err(e) = &result {
            error!("Turn {} failed: {}", turn_id, e);
            session.push(ConversationTurn::assistant(e.user_message()))?;
        }
        self.events.state(TurnState::Done);

        self.persist(session, utterance).await;
        result
    }

    async fn run_turn(
        &self,
        session: &mut ConversationSession,
        utterance: &str,
        turn_id: Uuid,
    ) -> Result<TurnReport> {
        self.events.state(TurnState::Classifying);
        let context = self.context.get().await?;
        let classification = self.classifier.classify(utterance, &context).await?;

        if !classification.is_query {
            self.events.state(TurnState::Simple);
            let answer = self.simple.generate(utterance).await?;
            session.push(ConversationTurn::assistant(answer.clone()))?;
            return Ok(TurnReport {
                turn_id,
                classification,
                outcome: TurnOutcome::Simple { answer },
            });
        }

        let report = self.query_loop.run(utterance, &context).await?;
        let attempts = report.attempt_count();

        let results = match report.outcome {
            LoopOutcome::Success { results, .. } => results,
            LoopOutcome::Exhausted { last_error } => {
                return Err(ChatError::RetriesExhausted { attempts, last_error });
            }
        };

        for result in &results {
            session.push(
                ConversationTurn::assistant(result.candidate.sql()).with_result(result.result_set.clone()),
            )?;
        }

        let chart = if classification.include_chart {
            self.chart(session, utterance, &results, &context).await?
        } else {
            ChartStatus::NotRequested
        };

        Ok(TurnReport {
            turn_id,
            classification,
            outcome: TurnOutcome::Answered {
                results,
                chart,
                attempts,
            },
        })
    }

    /// Chart the last successful result. Every failure here degrades to
    /// `ChartStatus::Unavailable`; the table is already answered.
    async fn chart(
        &self,
        session: &mut ConversationSession,
        utterance: &str,
        results: &[CandidateResult],
        context: &PromptContext,
    ) -> Result<ChartStatus> {
        self.events.state(TurnState::Charting);

        let rendered = match results.last() {
            Some(last) => match self.chart_generator.generate(utterance, &last.result_set, context).await {
                Ok(spec) => self.renderer.render(&spec).map_err(ChatError::from),
                Err(e) => Err(e),
            },
            None => Err(ChatError::Render(crate::chart::RenderError::NoChartProduced(
                "no result to chart".to_string(),
            ))),
        };

        match rendered {
            Ok(artifact) => {
                session.push(ConversationTurn::assistant(artifact.title.clone()).with_chart(artifact.clone()))?;
                Ok(ChartStatus::Rendered(artifact))
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Chart unavailable: {}", reason);
                self.events.emit(PipelineEvent::ChartUnavailable { reason: reason.clone() });
                session.push(ConversationTurn::assistant(format!("Chart unavailable: {}", reason)))?;
                Ok(ChartStatus::Unavailable(reason))
            }
        }
    }

    async fn persist(&self, session: &ConversationSession, utterance: &str) {
        if let Some(store) = &self.history {
            history::save_session(store.as_ref(), session).await;
        }

        if let Some(log) = &self.interaction_log {
            let answer = session.last_assistant_message().unwrap_or_default();
            if let Err(e) = log.record(&session.id, utterance, answer) {
                warn!("Failed to write interaction snapshot: {}", e);
            }
        }
    }
}

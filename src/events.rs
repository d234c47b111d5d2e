//! Pipeline Events - progress notifications for the chat surface
//!
//! The orchestrator drives the turn; listeners only observe. Sending never
//! blocks and a dropped receiver is ignored.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::execution_loop::SqlErrorClass;

/// Which generation step produced a text increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Classification,
    Query,
    ErrorFeedback,
    Chart,
    SimpleAnswer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Classification => write!(f, "classification"),
            Stage::Query => write!(f, "query"),
            Stage::ErrorFeedback => write!(f, "error-feedback"),
            Stage::Chart => write!(f, "chart"),
            Stage::SimpleAnswer => write!(f, "simple-answer"),
        }
    }
}

/// States of one turn. Attempt numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Classifying,
    Simple,
    Querying { attempt: u32 },
    Executing { attempt: u32 },
    Retry { attempt: u32 },
    Success,
    Exhausted,
    Charting,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    State(TurnState),
    TextDelta { stage: Stage, delta: String },
    AttemptFailed {
        attempt: u32,
        message: String,
        class: SqlErrorClass,
    },
    ChartUnavailable { reason: String },
}

/// Optional sender side of the event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn state(&self, state: TurnState) {
        self.emit(PipelineEvent::State(state));
    }
}

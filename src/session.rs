//! Conversation Sessions
//!
//! A session is an append-only list of turns owned by one user. The
//! registry hands out exclusive access: a second turn on a session that is
//! still processing gets `SessionBusy` instead of interleaving.

use crate::chart::ChartArtifact;
use crate::error::{ChatError, Result};
use crate::execution::ResultSet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_set: Option<ResultSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartArtifact>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            result_set: None,
            chart: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_result(mut self, result_set: ResultSet) -> Self {
        self.result_set = Some(result_set);
        self
    }

    pub fn with_chart(mut self, chart: ChartArtifact) -> Self {
        self.chart = Some(chart);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    turns: Vec<ConversationTurn>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }

    /// Rebuild a session from stored turns, re-checking every turn.
    pub fn from_turns(id: impl Into<String>, turns: Vec<ConversationTurn>) -> Result<Self> {
        let mut session = Self::new(id);
        for turn in turns {
            session.push(turn)?;
        }
        Ok(session)
    }

    /// Append a turn. A chart must follow a result set produced after the
    /// latest user message.
    pub fn push(&mut self, turn: ConversationTurn) -> Result<()> {
        if turn.chart.is_some() && turn.result_set.is_none() && !self.has_result_since_last_user() {
            return Err(ChatError::InvalidTurn(
                "a chart turn needs a result set from the same exchange".to_string(),
            ));
        }
        self.turns.push(turn);
        Ok(())
    }

    fn has_result_since_last_user(&self) -> bool {
        self.turns
            .iter()
            .rev()
            .take_while(|t| t.role != Role::User)
            .any(|t| t.role == Role::Assistant && t.result_set.is_some())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }
}

/// Live sessions keyed by id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<ConversationSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Register a session, replacing any idle one with the same id.
    pub fn insert(&self, session: ConversationSession) {
        self.sessions
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));
    }

    /// Exclusive access to `id`, creating an empty session if needed.
    pub fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<ConversationSession>> {
        let slot = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationSession::new(id))))
            .clone();

        slot.try_lock_owned()
            .map_err(|_| ChatError::SessionBusy(format!("session {} is still processing a turn", id)))
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }
}

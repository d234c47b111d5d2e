//! Generation Service - streaming text completions
//!
//! Every model call in the pipeline goes through [`GenerationService`]. A
//! response arrives as a stream of increments; [`TextGenerator`] forwards each
//! increment to the event sink and accumulates the full text before any
//! downstream parsing happens.

pub mod client;

pub use client::LlmClient;

use crate::error::{ChatError, Result};
use crate::events::{EventSink, PipelineEvent, Stage};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ordered text increments of one completion
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &str;

    /// Start a completion for `prompt`.
    async fn stream(&self, prompt: &str) -> Result<TextStream>;
}

/// Drain `stream`, emitting every non-empty increment before appending it.
pub async fn collect_text(mut stream: TextStream, stage: Stage, events: &EventSink) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.is_empty() {
            continue;
        }
        events.emit(PipelineEvent::TextDelta {
            stage,
            delta: delta.clone(),
        });
        text.push_str(&delta);
    }
    Ok(text)
}

/// A generation service bound to a timeout and an event sink
#[derive(Clone)]
pub struct TextGenerator {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
    events: EventSink,
}

impl TextGenerator {
    pub fn new(service: Arc<dyn GenerationService>, timeout: Duration, events: EventSink) -> Self {
        Self {
            service,
            timeout,
            events,
        }
    }

    /// Run one completion to the end and return the accumulated text.
    ///
    /// Exceeding the timeout yields `ChatError::Timeout`; increments already
    /// emitted stay emitted.
    pub async fn generate(&self, stage: Stage, prompt: &str) -> Result<String> {
        debug!("{} prompt via {} ({} chars)", stage, self.service.name(), prompt.len());

        let work = async {
            let stream = self.service.stream(prompt).await?;
            collect_text(stream, stage, &self.events).await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} generation exceeded {:?}", stage, self.timeout);
                Err(ChatError::Timeout(format!(
                    "{} generation exceeded {}s",
                    stage,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

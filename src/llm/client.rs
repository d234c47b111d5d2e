//! OpenAI-compatible chat completions client with server-sent event streaming

use super::{GenerationService, TextStream};
use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    streaming: bool,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ChatError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ChatError::Generation(format!("Failed to build HTTP client: {}", e)))?;

        info!("LLM client ready: model={} streaming={}", config.model, config.streaming);

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            streaming: config.streaming,
        })
    }

    async fn send(&self, prompt: &str) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "stream": self.streaming,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Generation(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationService for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let response = self.send(prompt).await?;

        if !self.streaming {
            let json: Value = response
                .json()
                .await
                .map_err(|e| ChatError::Generation(format!("Failed to parse LLM response: {}", e)))?;
            let content = json["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| ChatError::Generation("No content in LLM response".to_string()))?
                .to_string();
            return Ok(Box::pin(stream::iter(vec![Ok(content)])));
        }

        let (tx, rx) = mpsc::unbounded_channel::<Result<String>>();
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("LLM stream interrupted: {}", e);
                        let _ = tx.send(Err(ChatError::Generation(format!(
                            "Stream interrupted: {}",
                            e
                        ))));
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Delta(delta) => {
                            if tx.send(Ok(delta)).is_err() {
                                return;
                            }
                        }
                        SseEvent::Done => return,
                        SseEvent::Error(message) => {
                            let _ = tx.send(Err(ChatError::Generation(message)));
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Splits a byte stream into `data:` lines. Bytes are buffered until a full
/// line arrives so multi-byte characters split across chunks stay intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_sse_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }
}

pub(crate) fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let parsed: Value = serde_json::from_str(data).ok()?;
    if let Some(message) = parsed["error"]["message"].as_str() {
        return Some(SseEvent::Error(message.to_string()));
    }

    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .map(|delta| SseEvent::Delta(delta.to_string()))
}

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tablechat::config::PipelineConfig;
use tablechat::events::{EventSink, PipelineEvent};
use tablechat::execution::{ColumnInfo, ResultSet, Row, Warehouse, WarehouseError};
use tablechat::llm::{GenerationService, TextStream};
use tablechat::{Orchestrator, Result};
use tokio::sync::mpsc::UnboundedReceiver;

/// Replies handed out in order, one per completion, streamed in small pieces.
pub struct ScriptedGeneration {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGeneration {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("generation script exhausted");

        let chars: Vec<char> = reply.chars().collect();
        let pieces: Vec<Result<String>> = chars
            .chunks(7)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(pieces)))
    }
}

/// Results handed out in order, one per `run`.
pub struct ScriptedWarehouse {
    runs: Mutex<VecDeque<std::result::Result<ResultSet, WarehouseError>>>,
    executed: Mutex<Vec<String>>,
    pub reconnects: AtomicUsize,
}

impl ScriptedWarehouse {
    pub fn new(runs: Vec<std::result::Result<ResultSet, WarehouseError>>) -> Arc<Self> {
        Arc::new(Self {
            runs: Mutex::new(runs.into()),
            executed: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
        })
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for ScriptedWarehouse {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, sql: &str) -> std::result::Result<ResultSet, WarehouseError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(WarehouseError::Programming("unexpected query".to_string())))
    }

    async fn reconnect(&self) -> std::result::Result<(), WarehouseError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn describe_table(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        Ok(vec![
            ColumnInfo {
                name: "COUNTRY".to_string(),
                data_type: "TEXT".to_string(),
            },
            ColumnInfo {
                name: "SALES".to_string(),
                data_type: "NUMBER".to_string(),
            },
        ])
    }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        table_name: "DB.SALES.ORDERS".to_string(),
        table_description: "Orders by country".to_string(),
        ..PipelineConfig::default()
    }
}

pub fn orchestrator(
    llm: Arc<ScriptedGeneration>,
    warehouse: Arc<ScriptedWarehouse>,
) -> (Orchestrator, UnboundedReceiver<PipelineEvent>) {
    let (events, rx) = EventSink::channel();
    (Orchestrator::new(llm, warehouse, &pipeline_config(), events), rx)
}

pub fn drain(rx: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count_result(n: i64) -> ResultSet {
    ResultSet::new(vec!["N".to_string()], vec![Row::new(vec![json!(n)])])
}

pub fn sales_result() -> ResultSet {
    ResultSet::new(
        vec!["COUNTRY".to_string(), "SALES".to_string()],
        vec![
            Row::new(vec![json!("AR"), json!(120)]),
            Row::new(vec![json!("UY"), json!(40)]),
            Row::new(vec![json!("CL"), json!(75)]),
        ],
    )
}

pub const SIMPLE: &str = r#"{"is_a_query": false, "include_chart": false, "simple_answer": true}"#;
pub const QUERY: &str = r#"```json
{"is_a_query": true, "include_chart": false, "simple_answer": false}
```"#;
pub const QUERY_WITH_CHART: &str = r#"{"is_a_query": true, "include_chart": true, "simple_answer": false}"#;

pub fn sql_reply(sql: &str) -> String {
    format!("```sql\n{}\n```", sql)
}

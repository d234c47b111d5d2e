//! Candidate executor
//!
//! Engine rejections come back as [`ExecutionResult::Failed`] so the retry
//! loop can feed them to the next attempt. A connection failure gets one
//! reconnect and one re-run before it is reported the same way.

use super::{QueryGuard, ResultSet, Warehouse, WarehouseError};
use crate::error::{ChatError, ExecutionError, Result};
use crate::extract::QueryCandidate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Rows(ResultSet),
    Failed(ExecutionError),
}

pub struct QueryExecutor {
    warehouse: Arc<dyn Warehouse>,
    guard: QueryGuard,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(warehouse: Arc<dyn Warehouse>, timeout: Duration) -> Self {
        Self {
            warehouse,
            guard: QueryGuard::new(),
            timeout,
        }
    }

    /// `Err` is reserved for a store that cannot be reached at all, i.e. the
    /// reconnect itself failed.
    pub async fn execute(&self, candidate: &QueryCandidate) -> Result<ExecutionResult> {
        let sql = candidate.sql();
        debug!("Executing on {}: {}", self.warehouse.name(), sql);

        if let Err(message) = self.guard.check(sql) {
            warn!("Guard rejected candidate: {}", message);
            return Ok(ExecutionResult::Failed(ExecutionError::new(message, sql)));
        }

        let start = Instant::now();
        let outcome = match self.run_once(sql).await {
            Err(WarehouseError::Connection(msg)) => {
                warn!("🔌 Connection lost on {} ({}), reconnecting once", self.warehouse.name(), msg);
                self.warehouse
                    .reconnect()
                    .await
                    .map_err(|e| ChatError::Connection(e.to_string()))?;
                self.run_once(sql).await
            }
            other => other,
        };

        match outcome {
            Ok(rows) => {
                info!(
                    "✅ Query returned {} rows in {}ms",
                    rows.len(),
                    start.elapsed().as_millis()
                );
                Ok(ExecutionResult::Rows(rows))
            }
            Err(e) => {
                warn!("❌ Query failed: {}", e);
                Ok(ExecutionResult::Failed(ExecutionError::new(e.to_string(), sql)))
            }
        }
    }

    async fn run_once(&self, sql: &str) -> std::result::Result<ResultSet, WarehouseError> {
        match tokio::time::timeout(self.timeout, self.warehouse.run(sql)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::Programming(format!(
                "Query timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

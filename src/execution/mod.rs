//! Query Execution - data store backends and the candidate executor
//!
//! A [`Warehouse`] runs one statement and reports either rows or a
//! [`WarehouseError`]. The [`QueryExecutor`] sits on top of it and turns
//! engine failures into feedback for the retry loop.

pub mod executor;
pub mod guard;
pub mod polars_engine;
pub mod result;
pub mod snowflake;

pub use executor::{ExecutionResult, QueryExecutor};
pub use guard::QueryGuard;
pub use polars_engine::PolarsWarehouse;
pub use result::{ResultSet, Row};
pub use snowflake::SnowflakeWarehouse;

use crate::error::{ChatError, ExecutionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    /// The engine parsed or ran the statement and rejected it
    #[error("{0}")]
    Programming(String),

    /// The session or transport is unusable
    #[error("connection failed: {0}")]
    Connection(String),
}

impl WarehouseError {
    pub fn is_connection(&self) -> bool {
        matches!(self, WarehouseError::Connection(_))
    }
}

/// A column as reported by the store's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one statement and collect every row.
    async fn run(&self, sql: &str) -> std::result::Result<ResultSet, WarehouseError>;

    /// Drop the current session and open a fresh one.
    async fn reconnect(&self) -> std::result::Result<(), WarehouseError>;

    /// Column names and types of `table`, in ordinal order.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// Map a store failure outside the retry loop (context lookups, metadata).
pub(crate) fn into_chat_error(err: WarehouseError, sql: &str) -> ChatError {
    match err {
        WarehouseError::Connection(msg) => ChatError::Connection(msg),
        WarehouseError::Programming(msg) => ChatError::Execution(ExecutionError::new(msg, sql)),
    }
}

/// `DB.SCHEMA.TABLE` split into parts; missing leading parts are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl QualifiedName {
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ChatError::Config(format!("Invalid table name: {:?}", name)));
        }
        match parts.as_slice() {
            [table] => Ok(Self {
                database: None,
                schema: None,
                table: table.to_string(),
            }),
            [schema, table] => Ok(Self {
                database: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [database, schema, table] => Ok(Self {
                database: Some(database.to_string()),
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            _ => Err(ChatError::Config(format!("Invalid table name: {:?}", name))),
        }
    }
}

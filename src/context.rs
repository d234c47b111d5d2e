//! Prompt Context - table schema and variable definitions for prompts
//!
//! Built once per table from the store's catalog and reused for every turn.

use crate::error::Result;
use crate::execution::{into_chat_error, ColumnInfo, Warehouse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A documented coded variable (`VARIABLE_NAME`, `DEFINITION`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContext {
    pub table_name: String,
    pub table_description: String,
    pub columns: Vec<ColumnInfo>,
    pub variables: Vec<VariableDefinition>,
}

impl PromptContext {
    pub fn render(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("- **{}**: {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join("\n");

        let mut out = format!(
            "Here is the table name <tableName> {table} </tableName>\n\
             <tableDescription>{description}</tableDescription>\n\
             Here are the columns of the {table}\n\
             <columns>\n\n{columns}\n\n</columns>\n",
            table = self.table_name,
            description = self.table_description.trim(),
            columns = columns,
        );

        if !self.variables.is_empty() {
            let variables = self
                .variables
                .iter()
                .map(|v| format!("- **{}**: {}", v.name, v.definition))
                .collect::<Vec<_>>()
                .join("\n");
            out.push_str(&format!(
                "\nAvailable variables by VARIABLE_NAME:\n\n{}\n",
                variables
            ));
        }

        out
    }
}

pub struct ContextBuilder {
    warehouse: Arc<dyn Warehouse>,
    table_name: String,
    table_description: String,
    metadata_query: Option<String>,
    cache: OnceCell<Arc<PromptContext>>,
}

impl ContextBuilder {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        table_name: impl Into<String>,
        table_description: impl Into<String>,
        metadata_query: Option<String>,
    ) -> Self {
        Self {
            warehouse,
            table_name: table_name.into(),
            table_description: table_description.into(),
            metadata_query,
            cache: OnceCell::new(),
        }
    }

    /// The cached context, fetching it on first use. A failed fetch is not
    /// cached.
    pub async fn get(&self) -> Result<Arc<PromptContext>> {
        self.cache
            .get_or_try_init(|| async { self.build().await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn build(&self) -> Result<PromptContext> {
        let columns = self.warehouse.describe_table(&self.table_name).await?;
        info!("Schema for {}: {} columns", self.table_name, columns.len());

        let variables = match &self.metadata_query {
            Some(sql) => match self.warehouse.run(sql).await {
                Ok(rows) => {
                    let name_idx = rows.column_index("VARIABLE_NAME").unwrap_or(0);
                    let def_idx = rows.column_index("DEFINITION").unwrap_or(1);
                    rows.rows
                        .iter()
                        .map(|row| VariableDefinition {
                            name: cell_text(row.get(name_idx)),
                            definition: cell_text(row.get(def_idx)),
                        })
                        .collect()
                }
                Err(e) if e.is_connection() => return Err(into_chat_error(e, sql)),
                Err(e) => {
                    warn!("Metadata query failed, continuing without variables: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(PromptContext {
            table_name: self.table_name.clone(),
            table_description: self.table_description.clone(),
            columns,
            variables,
        })
    }
}

fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

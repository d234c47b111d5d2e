//! Snowflake Warehouse - SQL over the Snowflake REST session API
//!
//! Logs in lazily with user/password, keeps the session token, and runs
//! statements through `/queries/v1/query-request`. Expired or invalid
//! sessions surface as `WarehouseError::Connection` so the executor can
//! reconnect. Large results arrive partly as remote chunks, which are
//! downloaded and appended in order.

use super::{into_chat_error, ColumnInfo, QualifiedName, ResultSet, Row, Warehouse, WarehouseError};
use crate::config::WarehouseConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Session-expired and token-invalid codes
const SESSION_ERROR_CODES: &[&str] = &["390112", "390114", "390111", "390195"];

const AUTH_EXPIRED_MESSAGE: &str = "Authentication token has expired";

pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    config: WarehouseConfig,
    base_url: String,
    token: RwLock<Option<String>>,
    sequence: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

impl SnowflakeWarehouse {
    pub fn new(config: WarehouseConfig) -> Result<Self> {
        if config.account.is_empty() && config.base_url.is_none() {
            return Err(ChatError::Config("SNOWFLAKE_ACCOUNT is not set".to_string()));
        }
        if config.user.is_empty() {
            return Err(ChatError::Config("SNOWFLAKE_USER is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ChatError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.account_url(),
            config,
            token: RwLock::new(None),
            sequence: AtomicU64::new(0),
        })
    }

    async fn login(&self) -> std::result::Result<String, WarehouseError> {
        let account_name = self
            .config
            .account
            .split('.')
            .next()
            .unwrap_or_default()
            .to_uppercase();

        let mut params: Vec<(&str, &str)> = vec![
            ("databaseName", self.config.database.as_str()),
            ("schemaName", self.config.schema.as_str()),
        ];
        if let Some(warehouse) = &self.config.warehouse {
            params.push(("warehouse", warehouse.as_str()));
        }
        if let Some(role) = &self.config.role {
            params.push(("roleName", role.as_str()));
        }

        let body = serde_json::json!({
            "data": {
                "CLIENT_APP_ID": "tablechat",
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": account_name,
                "LOGIN_NAME": self.config.user,
                "PASSWORD": self.config.password,
                // keep rowsets inline as JSON
                "SESSION_PARAMETERS": {"PYTHON_CONNECTOR_QUERY_RESULT_FORMAT": "JSON"},
            }
        });

        let response: ApiResponse = self
            .client
            .post(format!("{}/session/v1/login-request", self.base_url))
            .query(&params)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Login request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Invalid login response: {}", e)))?;

        if !response.success {
            return Err(WarehouseError::Connection(format!(
                "Login rejected ({}): {}",
                response.code.unwrap_or_default(),
                response.message.unwrap_or_default()
            )));
        }

        let token = response
            .data
            .as_ref()
            .and_then(|d| d["token"].as_str())
            .ok_or_else(|| WarehouseError::Connection("Login response has no token".to_string()))?;

        info!("❄️  Snowflake session opened for {}", self.config.user);
        Ok(token.to_string())
    }

    /// Log in, retrying once when the server reports an expired auth token.
    async fn open_session(&self) -> std::result::Result<String, WarehouseError> {
        match self.login().await {
            Err(WarehouseError::Connection(msg)) if msg.contains(AUTH_EXPIRED_MESSAGE) => {
                warn!("Auth token expired during login, retrying");
                self.login().await
            }
            other => other,
        }
    }

    async fn token(&self) -> std::result::Result<String, WarehouseError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.clone() {
            return Ok(token);
        }
        let token = self.open_session().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Download the remote chunks of `page` in order and append their rows.
    async fn fetch_chunks(&self, page: &mut QueryPage) -> std::result::Result<(), WarehouseError> {
        let chunks = std::mem::take(&mut page.chunks);
        if chunks.is_empty() {
            return Ok(());
        }
        info!("📦 Fetching {} result chunks", chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let mut request = self.client.get(&chunk.url);
            for (name, value) in &page.chunk_headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request
                .send()
                .await
                .map_err(|e| WarehouseError::Connection(format!("Result chunk {} request failed: {}", i, e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(WarehouseError::Programming(format!(
                    "Result chunk {} could not be downloaded: HTTP {}",
                    i, status
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| WarehouseError::Connection(format!("Result chunk {} was interrupted: {}", i, e)))?;
            let rows = decode_chunk(&body)
                .map_err(|e| WarehouseError::Programming(format!("Result chunk {} is malformed: {}", i, e)))?;

            if let Some(expected) = chunk.row_count {
                if rows.len() != expected {
                    return Err(WarehouseError::Programming(format!(
                        "Result chunk {} has {} rows, expected {}",
                        i,
                        rows.len(),
                        expected
                    )));
                }
            }
            page.rows.extend(rows);
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    async fn run(&self, sql: &str) -> std::result::Result<ResultSet, WarehouseError> {
        let token = self.token().await?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let request_id = uuid::Uuid::new_v4().to_string();

        let body = serde_json::json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": sequence,
            "querySubmissionTime": chrono::Utc::now().timestamp_millis(),
        });

        let http = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", request_id.as_str())])
            .header("Accept", "application/json")
            .header("Authorization", format!("Snowflake Token=\"{}\"", token))
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Query request failed: {}", e)))?;

        if http.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(WarehouseError::Connection("Session is no longer authorized".to_string()));
        }

        let response: ApiResponse = http
            .json()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Invalid query response: {}", e)))?;

        let mut page = parse_query_response(response)?;
        self.fetch_chunks(&mut page).await?;
        page.into_result_set()
    }

    async fn reconnect(&self) -> std::result::Result<(), WarehouseError> {
        let mut guard = self.token.write().await;
        *guard = None;
        let token = self.open_session().await?;
        *guard = Some(token);
        Ok(())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let name = QualifiedName::parse(table)?;
        let database = name.database.unwrap_or_else(|| self.config.database.clone());
        let schema = name.schema.unwrap_or_else(|| self.config.schema.clone());

        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM {}.INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' ORDER BY ORDINAL_POSITION",
            database.to_uppercase(),
            quote_literal(&schema.to_uppercase()),
            quote_literal(&name.table.to_uppercase()),
        );

        let rows = self.run(&sql).await.map_err(|e| into_chat_error(e, &sql))?;
        Ok(rows
            .rows
            .iter()
            .map(|row| ColumnInfo {
                name: text_of(row.get(0)),
                data_type: text_of(row.get(1)),
            })
            .collect())
    }
}

/// One query response: column metadata, inline rows, and the remote chunks
/// holding the rest of the result.
#[derive(Debug)]
struct QueryPage {
    row_types: Vec<RowType>,
    rows: Vec<Vec<Value>>,
    chunks: Vec<ChunkRef>,
    chunk_headers: Vec<(String, String)>,
    total: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRef {
    url: String,
    #[serde(default)]
    row_count: Option<usize>,
}

impl QueryPage {
    /// Type every raw row. Fails while remote chunks are still pending or
    /// when fewer rows arrived than the server reported.
    fn into_result_set(self) -> std::result::Result<ResultSet, WarehouseError> {
        if !self.chunks.is_empty() {
            let pending: usize = self.chunks.iter().filter_map(|c| c.row_count).sum();
            return Err(WarehouseError::Programming(format!(
                "Result too large: {} rows are held in {} remote chunks that were not fetched",
                pending,
                self.chunks.len()
            )));
        }
        if let Some(total) = self.total {
            if total != self.rows.len() {
                return Err(WarehouseError::Programming(format!(
                    "Incomplete result: expected {} rows, received {}",
                    total,
                    self.rows.len()
                )));
            }
        }

        let columns = self.row_types.iter().map(|t| t.name.clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|cells| {
                Row::new(
                    self.row_types
                        .iter()
                        .enumerate()
                        .map(|(i, t)| convert_cell(cells.get(i).unwrap_or(&Value::Null), t))
                        .collect(),
                )
            })
            .collect();

        Ok(ResultSet::new(columns, rows))
    }
}

fn parse_query_response(response: ApiResponse) -> std::result::Result<QueryPage, WarehouseError> {
    if !response.success {
        let code = response.code.unwrap_or_default();
        let message = response.message.unwrap_or_else(|| "Unknown Snowflake error".to_string());
        if SESSION_ERROR_CODES.contains(&code.as_str()) {
            return Err(WarehouseError::Connection(format!("{} ({})", message, code)));
        }
        return Err(WarehouseError::Programming(if code.is_empty() {
            message
        } else {
            format!("{}: {}", code, message)
        }));
    }

    let data = response.data.unwrap_or(Value::Null);
    let row_types: Vec<RowType> = serde_json::from_value(data["rowtype"].clone())
        .map_err(|e| WarehouseError::Programming(format!("Unexpected result metadata: {}", e)))?;

    let chunks: Vec<ChunkRef> = match &data["chunks"] {
        Value::Null => Vec::new(),
        raw => serde_json::from_value(raw.clone())
            .map_err(|e| WarehouseError::Programming(format!("Unexpected chunk metadata: {}", e)))?,
    };

    // explicit chunk headers win over the SSE-C key
    let chunk_headers = match data["chunkHeaders"].as_object() {
        Some(headers) => headers
            .iter()
            .map(|(k, v)| (k.clone(), text_of(Some(v))))
            .collect(),
        None => match data["qrmk"].as_str() {
            Some(qrmk) => vec![
                (
                    "x-amz-server-side-encryption-customer-algorithm".to_string(),
                    "AES256".to_string(),
                ),
                (
                    "x-amz-server-side-encryption-customer-key".to_string(),
                    qrmk.to_string(),
                ),
            ],
            None => Vec::new(),
        },
    };

    let rows = data["rowset"]
        .as_array()
        .map(|rowset| {
            rowset
                .iter()
                .map(|raw| raw.as_array().cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();

    Ok(QueryPage {
        row_types,
        rows,
        chunks,
        chunk_headers,
        total: data["total"].as_u64().map(|t| t as usize),
    })
}

/// Chunk bodies are comma-separated row arrays without the outer brackets.
fn decode_chunk(body: &str) -> serde_json::Result<Vec<Vec<Value>>> {
    let body = body.trim().trim_end_matches(',');
    if body.starts_with("[[") || body == "[]" {
        return serde_json::from_str(body);
    }
    serde_json::from_str(&format!("[{}]", body))
}

/// Rowset cells arrive as strings; type them from the column metadata.
fn convert_cell(cell: &Value, row_type: &RowType) -> Value {
    let text = match cell {
        Value::String(s) => s.as_str(),
        Value::Null => return Value::Null,
        other => return other.clone(),
    };

    match row_type.kind.as_str() {
        "fixed" if row_type.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "fixed" | "real" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "boolean" => match text {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        _ => Value::String(text.to_string()),
    }
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

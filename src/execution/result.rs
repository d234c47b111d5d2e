//! Result Set - ordered rows returned by a data store

use crate::error::{ChatError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row; values are positional and line up with `ResultSet::columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Column names plus rows, in the order the store returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as `{column: value}` objects.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.values.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// First `limit` rows.
    pub fn preview(&self, limit: usize) -> ResultSet {
        ResultSet {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(limit).cloned().collect(),
        }
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            let mut values = Vec::with_capacity(columns.len());
            for series in df.get_columns() {
                values.push(series_to_json_value(series, row_idx)?);
            }
            rows.push(Row::new(values));
        }

        Ok(Self { columns, rows })
    }

    /// Build a DataFrame, inferring one dtype per column: boolean, integer,
    /// float, else string. Nulls are allowed in any column.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len());

        for (idx, name) in self.columns.iter().enumerate() {
            let column: Vec<&Value> = self
                .rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&Value::Null))
                .collect();
            let present = column.iter().filter(|v| !v.is_null());

            let s = if present.clone().all(|v| v.is_boolean()) && column.iter().any(|v| v.is_boolean()) {
                Series::new(name, column.iter().map(|v| v.as_bool()).collect::<Vec<_>>())
            } else if present.clone().all(|v| v.is_i64()) && column.iter().any(|v| v.is_i64()) {
                Series::new(name, column.iter().map(|v| v.as_i64()).collect::<Vec<_>>())
            } else if present.clone().all(|v| v.is_number()) && column.iter().any(|v| v.is_number()) {
                Series::new(name, column.iter().map(|v| v.as_f64()).collect::<Vec<_>>())
            } else {
                Series::new(
                    name,
                    column
                        .iter()
                        .map(|v| match v {
                            Value::Null => None,
                            Value::String(s) => Some(s.clone()),
                            other => Some(other.to_string()),
                        })
                        .collect::<Vec<_>>(),
                )
            };
            series.push(s);
        }

        DataFrame::new(series).map_err(ChatError::from)
    }
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| ChatError::Polars(format!("Failed to get value: {}", e)))?;

    let value = match any_val {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::Number(i.into()),
        AnyValue::Int16(i) => Value::Number(i.into()),
        AnyValue::Int32(i) => Value::Number(i.into()),
        AnyValue::Int64(i) => Value::Number(i.into()),
        AnyValue::UInt8(u) => Value::Number(u.into()),
        AnyValue::UInt16(u) => Value::Number(u.into()),
        AnyValue::UInt32(u) => Value::Number(u.into()),
        AnyValue::UInt64(u) => Value::Number(u.into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    };

    Ok(value)
}

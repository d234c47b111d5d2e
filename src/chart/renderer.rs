//! Chart rendering - validates a description against its data, aggregates
//! with Polars and emits a Vega-Lite document

use super::{Aggregation, ChartArtifact, ChartKind, ChartSpec, RenderError};
use crate::execution::ResultSet;
use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::{json, Map, Value};
use tracing::info;

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct ChartRenderer;

struct Plot {
    x: String,
    y: Option<String>,
    color: Option<String>,
    records: Vec<Map<String, Value>>,
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, spec: &ChartSpec) -> Result<ChartArtifact, RenderError> {
        if spec.kind == ChartKind::None {
            return Err(RenderError::NoChartProduced(
                "no chart fits this result".to_string(),
            ));
        }
        if spec.data.is_empty() {
            return Err(RenderError::NoChartProduced("the query returned no rows".to_string()));
        }

        let plot = self.prepare(spec)?;
        if plot.records.is_empty() {
            return Err(RenderError::NoChartProduced("nothing left to plot".to_string()));
        }

        let title = spec.title.clone().unwrap_or_else(|| match &plot.y {
            Some(y) => format!("{} by {}", y, plot.x),
            None => plot.x.clone(),
        });

        let vega_lite = json!({
            "$schema": VEGA_LITE_SCHEMA,
            "title": title,
            "data": {"values": plot.records},
            "mark": {"type": mark_type(spec.kind), "tooltip": true},
            "encoding": encoding(spec.kind, &plot),
        });

        info!("📊 Rendered {:?} chart with {} points", spec.kind, plot.records.len());
        Ok(ChartArtifact {
            kind: spec.kind,
            title,
            vega_lite,
        })
    }

    fn prepare(&self, spec: &ChartSpec) -> Result<Plot, RenderError> {
        let data = &spec.data;
        let x = spec
            .x
            .as_deref()
            .ok_or_else(|| RenderError::InvalidSpec("x column is required".to_string()))
            .and_then(|name| resolve(data, name))?;
        let y = spec.y.as_deref().map(|name| resolve(data, name)).transpose()?;
        let color = spec.color.as_deref().map(|name| resolve(data, name)).transpose()?;

        let df = data
            .to_dataframe()
            .map_err(|e| RenderError::Evaluation(e.to_string()))?;

        if spec.kind == ChartKind::Histogram {
            require_numeric(&df, &x)?;
            return Ok(Plot {
                x,
                y: None,
                color,
                records: data.to_records(),
            });
        }

        let (df, y) = match (spec.aggregation, y) {
            (Aggregation::None, Some(y)) => (df, y),
            (Aggregation::None, None) => {
                return Err(RenderError::InvalidSpec(
                    "y column is required unless aggregation is count".to_string(),
                ))
            }
            (aggregation, y) => aggregate(df, &x, y.as_deref(), color.as_deref(), aggregation)?,
        };
        require_numeric(&df, &y)?;

        let records = ResultSet::from_dataframe(&df)
            .map_err(|e| RenderError::Evaluation(e.to_string()))?
            .to_records();

        Ok(Plot {
            x,
            y: Some(y),
            color,
            records,
        })
    }
}

fn resolve(data: &ResultSet, name: &str) -> Result<String, RenderError> {
    data.column_index(name)
        .map(|idx| data.columns[idx].clone())
        .ok_or_else(|| {
            RenderError::Evaluation(format!(
                "column {:?} is not in the result (columns: {})",
                name,
                data.columns.join(", ")
            ))
        })
}

fn require_numeric(df: &DataFrame, column: &str) -> Result<(), RenderError> {
    let series = df
        .column(column)
        .map_err(|e| RenderError::Evaluation(e.to_string()))?;
    if series.dtype().is_numeric() {
        Ok(())
    } else {
        Err(RenderError::Evaluation(format!(
            "column {:?} is not numeric ({})",
            column,
            series.dtype()
        )))
    }
}

/// Group by x (and color) in first-seen order; returns the frame and the
/// name of the value column.
fn aggregate(
    df: DataFrame,
    x: &str,
    y: Option<&str>,
    color: Option<&str>,
    aggregation: Aggregation,
) -> Result<(DataFrame, String), RenderError> {
    let mut keys = vec![col(x)];
    if let Some(color) = color {
        keys.push(col(color));
    }

    let (expr, value_name) = match (aggregation, y) {
        (Aggregation::Count, Some(y)) => (col(y).count().alias(y), y.to_string()),
        (Aggregation::Count, None) => (col(x).count().alias("count"), "count".to_string()),
        (_, None) => {
            return Err(RenderError::InvalidSpec(format!(
                "aggregation {:?} needs a y column",
                aggregation
            )))
        }
        (Aggregation::Sum, Some(y)) => (col(y).sum(), y.to_string()),
        (Aggregation::Mean, Some(y)) => (col(y).mean(), y.to_string()),
        (Aggregation::Min, Some(y)) => (col(y).min(), y.to_string()),
        (Aggregation::Max, Some(y)) => (col(y).max(), y.to_string()),
        (Aggregation::None, Some(y)) => return Ok((df, y.to_string())),
    };

    if aggregation != Aggregation::Count {
        require_numeric(&df, &value_name)?;
    }

    let out = df
        .lazy()
        .group_by_stable(keys)
        .agg([expr])
        .collect()
        .map_err(|e| RenderError::Evaluation(e.to_string()))?;

    Ok((out, value_name))
}

fn mark_type(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::Bar | ChartKind::Histogram => "bar",
        ChartKind::Line => "line",
        ChartKind::Pie => "arc",
        ChartKind::Scatter => "point",
        ChartKind::Area => "area",
        ChartKind::None => "text",
    }
}

fn field_type(records: &[Map<String, Value>], field: &str, kind: ChartKind) -> &'static str {
    let values: Vec<&Value> = records
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| !v.is_null())
        .collect();

    let is_date = |v: &&Value| {
        v.as_str()
            .and_then(|s| s.get(..10))
            .map_or(false, |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
    };

    if !values.is_empty() && values.iter().all(is_date) {
        "temporal"
    } else if !values.is_empty()
        && values.iter().all(|v| v.is_number())
        && matches!(kind, ChartKind::Line | ChartKind::Area | ChartKind::Scatter)
    {
        "quantitative"
    } else {
        "nominal"
    }
}

fn encoding(kind: ChartKind, plot: &Plot) -> Value {
    let mut enc = Map::new();

    match kind {
        ChartKind::Pie => {
            if let Some(y) = &plot.y {
                enc.insert("theta".to_string(), json!({"field": y, "type": "quantitative"}));
            }
            enc.insert("color".to_string(), json!({"field": plot.x, "type": "nominal"}));
            return Value::Object(enc);
        }
        ChartKind::Histogram => {
            enc.insert("x".to_string(), json!({"field": plot.x, "bin": true, "type": "quantitative"}));
            enc.insert("y".to_string(), json!({"aggregate": "count", "type": "quantitative"}));
        }
        _ => {
            enc.insert(
                "x".to_string(),
                json!({"field": plot.x, "type": field_type(&plot.records, &plot.x, kind)}),
            );
            if let Some(y) = &plot.y {
                enc.insert("y".to_string(), json!({"field": y, "type": "quantitative"}));
            }
        }
    }

    if let Some(color) = &plot.color {
        enc.insert("color".to_string(), json!({"field": color, "type": "nominal"}));
    }
    Value::Object(enc)
}

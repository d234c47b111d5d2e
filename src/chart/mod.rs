//! Charts - declarative chart descriptions rendered to Vega-Lite
//!
//! The model never writes code. It picks a chart kind and columns from the
//! query result; [`ChartRenderer`] validates that choice against the data
//! and evaluates it.

pub mod generator;
pub mod renderer;

pub use generator::ChartGenerator;
pub use renderer::ChartRenderer;

use crate::execution::ResultSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The chart step yielded nothing drawable
    #[error("no chart produced: {0}")]
    NoChartProduced(String),

    #[error("invalid chart description: {0}")]
    InvalidSpec(String),

    /// The description does not fit the data
    #[error("chart evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
    Histogram,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    None,
    Sum,
    #[serde(alias = "avg", alias = "average")]
    Mean,
    Count,
    Min,
    Max,
}

/// A chart description bound to the data it draws
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: Option<String>,
    pub y: Option<String>,
    pub aggregation: Aggregation,
    pub color: Option<String>,
    pub title: Option<String>,
    pub data: ResultSet,
}

/// A rendered chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub kind: ChartKind,
    pub title: String,
    pub vega_lite: serde_json::Value,
}

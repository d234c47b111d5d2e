//! Chart description generation

use super::{Aggregation, ChartKind, ChartSpec, RenderError};
use crate::context::PromptContext;
use crate::error::Result;
use crate::events::Stage;
use crate::execution::ResultSet;
use crate::extract;
use crate::llm::TextGenerator;
use crate::prompts::{fill, CHART_TEMPLATE};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RawChartSpec {
    #[serde(alias = "kind", alias = "type")]
    chart_type: ChartKind,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    aggregation: Option<Aggregation>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Parse the last ```json block of `text` into a spec over `data`.
pub fn parse_chart_spec(text: &str, data: &ResultSet) -> std::result::Result<ChartSpec, RenderError> {
    let block = extract::last_block(text, "json")
        .ok_or_else(|| RenderError::NoChartProduced("response contained no ```json block".to_string()))?;

    let raw: RawChartSpec =
        serde_json::from_str(&block).map_err(|e| RenderError::InvalidSpec(e.to_string()))?;

    let column = |name: Option<String>| name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    Ok(ChartSpec {
        kind: raw.chart_type,
        x: column(raw.x),
        y: column(raw.y),
        aggregation: raw.aggregation.unwrap_or_default(),
        color: column(raw.color),
        title: raw.title,
        data: data.clone(),
    })
}

pub struct ChartGenerator {
    text: TextGenerator,
    row_limit: usize,
}

impl ChartGenerator {
    pub fn new(text: TextGenerator, row_limit: usize) -> Self {
        Self { text, row_limit }
    }

    pub async fn generate(
        &self,
        utterance: &str,
        result: &ResultSet,
        context: &PromptContext,
    ) -> Result<ChartSpec> {
        let preview = result.preview(self.row_limit);
        let rows = serde_json::to_string(&preview.to_records())?;
        let columns = result.columns.join(", ");
        let rendered = context.render();

        let prompt = fill(
            CHART_TEMPLATE,
            &[
                ("context", rendered.as_str()),
                ("columns", columns.as_str()),
                ("rows", rows.as_str()),
                ("user_input", utterance),
            ],
        );

        let text = self.text.generate(Stage::Chart, &prompt).await?;
        let spec = parse_chart_spec(&text, result)?;
        info!("📊 Chart described: {:?} x={:?} y={:?}", spec.kind, spec.x, spec.y);
        Ok(spec)
    }
}

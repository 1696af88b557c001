//! JSON output format for footprint reports

use serde::{Deserialize, Serialize};

use crate::report::{AppSummary, CombinedDistinct, ReportRow};

/// One function row in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFunctionRow {
    /// Resolved function name (or hex address / "(unknown)")
    pub function: String,
    /// Function entry point
    pub entry: u64,
    /// Completed call instances
    pub calls: u64,
    /// Distinct cache lines across those calls
    pub distinct: u64,
    /// Distinct cache lines per call
    pub average: f64,
}

/// Combined per-application metric in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCombined {
    pub app: String,
    pub ops: u64,
    pub total_distinct: u64,
    pub average: f64,
}

/// Complete analysis output in JSON format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonReport {
    /// Per-function footprint rows, ordered by entry point
    pub functions: Vec<JsonFunctionRow>,
    /// Combined application metric (if requested)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<JsonCombined>,
}

impl JsonReport {
    /// Build the JSON report from the text-report rows.
    pub fn from_rows(rows: &[ReportRow]) -> Self {
        Self {
            functions: rows
                .iter()
                .map(|row| JsonFunctionRow {
                    function: row.name.clone(),
                    entry: row.entry,
                    calls: row.calls,
                    distinct: row.distinct,
                    average: row.average,
                })
                .collect(),
            combined: None,
        }
    }

    /// Attach the combined application metric.
    pub fn set_combined(&mut self, summary: &AppSummary, combined: &CombinedDistinct) {
        self.combined = Some(JsonCombined {
            app: summary.name.clone(),
            ops: summary.ops,
            total_distinct: combined.total,
            average: combined.average,
        });
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

//! Per-function footprint reporting
//!
//! Turns the tracker's aggregate table into a human-readable summary and
//! computes the combined distinct-footprint metric for a configured
//! application run.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::warn;

use crate::footprint::FootprintTracker;
use crate::symbols::SymbolResolver;

/// One row of the per-function summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    /// Resolved function name, `(unknown)` for entry 0, hex fallback otherwise.
    pub name: String,
    /// Function entry point.
    pub entry: u64,
    /// Completed call instances.
    pub calls: u64,
    /// Distinct cache lines summed over those calls.
    pub distinct: u64,
    /// Distinct cache lines per call.
    pub average: f64,
}

/// Configuration or trace mismatches in the combined-metric query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    /// The application has no configured function profile.
    #[error("no function profile configured for application '{0}'")]
    UnknownApplication(String),
    /// A configured function has no recorded statistics in this trace.
    #[error("no recorded statistics for configured function '{0}'")]
    MissingFunctionStats(String),
}

/// Application identity and total operation count for one captured run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSummary {
    pub name: String,
    pub ops: u64,
}

/// Fixed table mapping an application to the traced functions of interest.
#[derive(Debug, Clone)]
pub struct AppProfiles {
    profiles: HashMap<String, BTreeSet<String>>,
}

impl Default for AppProfiles {
    fn default() -> Self {
        let mut profiles = Self {
            profiles: HashMap::new(),
        };
        profiles.insert("procy", ["stub_clone", "sys_exit_group", "sys_wait4"]);
        profiles
    }
}

impl AppProfiles {
    /// Register (or replace) the function set for an application.
    pub fn insert<S, I, F>(&mut self, app: S, functions: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.profiles.insert(
            app.into(),
            functions.into_iter().map(Into::into).collect(),
        );
    }

    /// Function set configured for `app`, if any.
    pub fn functions(&self, app: &str) -> Option<&BTreeSet<String>> {
        self.profiles.get(app)
    }
}

/// Combined distinct-footprint metric for one application run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedDistinct {
    /// Summed distinct counts across the configured functions.
    pub total: u64,
    /// Distinct cache lines per application operation.
    pub average: f64,
}

/// Build the report rows from a tracker snapshot, ordered by entry point.
pub fn report_rows(tracker: &FootprintTracker, resolver: &dyn SymbolResolver) -> Vec<ReportRow> {
    tracker
        .snapshot()
        .into_iter()
        .map(|(entry, stats)| {
            let name = display_name(entry, resolver);
            ReportRow {
                name,
                entry,
                calls: stats.calls,
                distinct: stats.distinct,
                average: stats.average(),
            }
        })
        .collect()
}

fn display_name(entry: u64, resolver: &dyn SymbolResolver) -> String {
    if entry == 0 {
        return "(unknown)".to_string();
    }
    match resolver.lookup(entry) {
        Some(symbol) => symbol.function,
        None => {
            // Resolution failure is reportable, not fatal
            warn!("no symbol for entry point {entry:#x}");
            format!("{entry:x}")
        }
    }
}

/// Print the column-aligned summary table to stdout.
pub fn print_summary(rows: &[ReportRow]) {
    println!(
        "{:<32} {:>10} {:>10} {:>10}",
        "function", "calls", "distinct", "ave"
    );
    for row in rows {
        println!(
            "{:<32} {:>10} {:>10} {:>10.2}",
            row.name, row.calls, row.distinct, row.average
        );
    }
}

/// Sum the distinct counts of the functions configured for the application
/// and relate them to the run's operation count.
pub fn combined_distinct(
    tracker: &FootprintTracker,
    resolver: &dyn SymbolResolver,
    profiles: &AppProfiles,
    summary: &AppSummary,
) -> Result<CombinedDistinct, ReportError> {
    let functions = profiles
        .functions(&summary.name)
        .ok_or_else(|| ReportError::UnknownApplication(summary.name.clone()))?;

    let mut total = 0u64;
    for function in functions {
        let distinct = tracker
            .distinct_for(function, resolver)
            .ok_or_else(|| ReportError::MissingFunctionStats(function.clone()))?;
        total += distinct;
    }

    let average = if summary.ops == 0 {
        0.0
    } else {
        total as f64 / summary.ops as f64
    };
    Ok(CombinedDistinct { total, average })
}

/// Print the one-line combined summary to stdout.
pub fn print_combined(summary: &AppSummary, combined: &CombinedDistinct) {
    println!(
        "{} ops: {} distincts: {} ave: {:.2}",
        summary.name, summary.ops, combined.total, combined.average
    );
}

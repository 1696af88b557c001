use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use huella::cli::{Cli, OutputFormat};
use huella::footprint::FootprintTracker;
use huella::json_output::JsonReport;
use huella::reader;
use huella::report::{self, AppProfiles, AppSummary};
use huella::symbols::{DwarfResolver, NoSymbols, SymbolResolver};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let resolver: Box<dyn SymbolResolver> = match &cli.binary {
        Some(path) => Box::new(
            DwarfResolver::load(path)
                .with_context(|| format!("failed to load debug info from {}", path.display()))?,
        ),
        None => Box::new(NoSymbols),
    };

    let file = File::open(&cli.trace)
        .with_context(|| format!("failed to open trace log {}", cli.trace.display()))?;

    let mut tracker = FootprintTracker::new(cli.cpus);
    let stats = reader::replay(BufReader::new(file), &mut tracker, !cli.start_disabled)?;
    tracker.flush().context("failed to finalize live call instances")?;
    tracing::debug!(events = stats.events, "trace replay finished");

    let rows = report::report_rows(&tracker, resolver.as_ref());

    let combined = match (&cli.app, cli.ops) {
        (Some(app), Some(ops)) => {
            let summary = AppSummary {
                name: app.clone(),
                ops,
            };
            let combined = report::combined_distinct(
                &tracker,
                resolver.as_ref(),
                &AppProfiles::default(),
                &summary,
            )?;
            Some((summary, combined))
        }
        _ => None,
    };

    match cli.format {
        OutputFormat::Text => {
            report::print_summary(&rows);
            if let Some((summary, combined)) = &combined {
                report::print_combined(summary, combined);
            }
        }
        OutputFormat::Json => {
            let mut json = JsonReport::from_rows(&rows);
            if let Some((summary, combined)) = &combined {
                json.set_combined(summary, combined);
            }
            println!(
                "{}",
                json.to_json().context("failed to serialize JSON report")?
            );
        }
    }

    Ok(())
}

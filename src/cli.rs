//! CLI argument parsing for Huella

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for footprint reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text table (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "huella")]
#[command(version)]
#[command(about = "Trace-log analyzer for distinct cache-line footprints per function", long_about = None)]
pub struct Cli {
    /// Captured trace event log (JSON lines, one event per line)
    pub trace: PathBuf,

    /// ELF binary with DWARF debug info for function name resolution
    #[arg(short = 'b', long = "binary", value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Report the combined distinct footprint for a configured application
    #[arg(long = "app", value_name = "NAME", requires = "ops")]
    pub app: Option<String>,

    /// Total operation count of the --app run
    #[arg(long = "ops", value_name = "COUNT")]
    pub ops: Option<u64>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Number of CPUs in the captured trace
    #[arg(long = "cpus", value_name = "N", default_value = "1")]
    pub cpus: usize,

    /// Start the replay with tracing disabled until a host enable marker
    #[arg(long = "start-disabled")]
    pub start_disabled: bool,

    /// Enable debug logging to stderr
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

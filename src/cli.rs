//! CLI argument parsing for querylens

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for replay summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON summary rows for machine parsing
    Json,
    /// Prometheus text exposition of the metrics registry
    Prometheus,
}

#[derive(Parser, Debug)]
#[command(name = "querylens")]
#[command(version)]
#[command(about = "SQL query observability: normalization, call-site attribution and telemetry fan-out", long_about = None)]
pub struct Cli {
    /// Enable debug output (per-query log records and internal diagnostics)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the normalized form of a statement
    Normalize {
        /// SQL statement text
        sql: String,
    },

    /// Print the coarse statement type (SELECT, INSERT, ..., OTHER)
    Classify {
        /// SQL statement text
        sql: String,
    },

    /// Replay recorded executions (JSON Lines) through the pipeline
    Replay {
        /// JSON Lines file of recorded executions
        file: PathBuf,

        /// Observability configuration (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Summary output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// OTLP endpoint URL for exporting execution spans (e.g., http://localhost:4317)
        #[arg(long = "otlp-endpoint", value_name = "URL")]
        otlp_endpoint: Option<String>,

        /// Service name reported with exported spans
        #[arg(long = "otlp-service-name", value_name = "NAME", default_value = "querylens")]
        otlp_service_name: String,
    },
}

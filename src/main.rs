use anyhow::{Context, Result};
use clap::Parser;
use querylens::{
    cli::{Cli, Command, OutputFormat},
    config::QueryObservabilityConfig,
    interceptor::Interceptor,
    log_sink::TracingLogSink,
    metrics::MetricsRegistry,
    normalize,
    otlp_exporter::{OtlpConfig, OtlpExporter},
    recorder::Recorder,
    replay,
    sink::TraceSink,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber
///
/// Slow-query warnings always reach stderr; `--debug` adds every query
/// record and internal diagnostics.
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "otlp")]
fn trace_sink() -> Arc<dyn TraceSink> {
    Arc::new(querylens::otlp_exporter::OtelTraceSink)
}

#[cfg(not(feature = "otlp"))]
fn trace_sink() -> Arc<dyn TraceSink> {
    Arc::new(querylens::sink::NoopTraceSink)
}

/// Replay a recorded workload and print the summary
fn run_replay(
    file: &Path,
    config_path: Option<&Path>,
    format: OutputFormat,
    otlp_endpoint: Option<String>,
    otlp_service_name: String,
) -> Result<()> {
    let config = match config_path {
        Some(path) => QueryObservabilityConfig::from_toml(path)?,
        None => QueryObservabilityConfig::default(),
    };
    let records = replay::load_replay(file)?;

    let exporter = match otlp_endpoint {
        Some(endpoint) => Some(OtlpExporter::new(OtlpConfig {
            endpoint,
            service_name: otlp_service_name,
            db_system: config.db_system.clone(),
            datasource_name: config.datasource_name.clone(),
        })?),
        None => None,
    };

    let registry = MetricsRegistry::global();
    let recorder = Recorder::new(registry.clone(), Arc::new(TracingLogSink), trace_sink());
    let interceptor = Interceptor::from_config(&config, recorder);

    let statements = replay::replay(&records, &interceptor, |_, run| match &exporter {
        Some(exporter) => exporter.in_span("db.execution", run),
        None => run(),
    });
    tracing::debug!(records = records.len(), statements, "replay finished");

    if let Some(exporter) = &exporter {
        exporter.shutdown();
    }

    match format {
        OutputFormat::Text => {
            let rows = replay::summarize(&registry);
            print!("{}", replay::format_summary(&rows, registry.unique_locations()));
        }
        OutputFormat::Json => {
            let rows = replay::summarize(&registry);
            let json =
                serde_json::to_string_pretty(&rows).context("Failed to serialize summary")?;
            println!("{}", json);
        }
        OutputFormat::Prometheus => {
            print!("{}", registry.render_prometheus());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::Normalize { sql } => {
            println!("{}", normalize::normalize(&sql));
        }
        Command::Classify { sql } => {
            println!("{}", normalize::classify(&sql));
        }
        Command::Replay {
            file,
            config,
            format,
            otlp_endpoint,
            otlp_service_name,
        } => {
            run_replay(
                &file,
                config.as_deref(),
                format,
                otlp_endpoint,
                otlp_service_name,
            )?;
        }
    }
    Ok(())
}

//! Three-sink recording of executed statements
//!
//! For every event the recorder, in fixed order:
//!
//! 1. increments `db.queries.total` and records `db.query.duration` keyed by
//!    (query_type, location), then records `db.query.execution_time_ms` keyed
//!    by (normalized query prefix, location)
//! 2. emits one structured log record, at warn level above
//!    [`SLOW_QUERY_THRESHOLD_MS`]
//! 3. tags the active span, if any
//!
//! The two latency instruments split cardinality: type+location is cheap
//! enough for dashboards and alerts, the normalized-query series is for
//! drilling into a specific statement shape.
//!
//! Every sink call runs in isolation. Errors and panics are caught, reported
//! through `tracing`, and never reach the code that ran the statement.

use crate::event::ExecutedStatementEvent;
use crate::log_sink::keys;
use crate::metrics::{MetricDescriptor, MetricKind};
use crate::normalize::truncate;
use crate::sink::{Field, LogSink, MetricSink, Severity, SinkResult, TraceSink};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Executions strictly slower than this are logged as slow queries
pub const SLOW_QUERY_THRESHOLD_MS: u64 = 100;

/// Max characters of normalized text used as a metric label
pub const METRIC_QUERY_LABEL_MAX: usize = 100;

/// Max characters of raw/normalized text in log records and span tags
pub const TEXT_FIELD_MAX: usize = 500;

/// Default value of the `db.system` span tag
pub const DEFAULT_DB_SYSTEM: &str = "mysql";

/// Percentiles published for `db.query.duration`
pub const LATENCY_PERCENTILES: [f64; 3] = [0.5, 0.95, 0.99];

pub const QUERIES_TOTAL: &str = "db.queries.total";
pub const QUERY_DURATION: &str = "db.query.duration";
pub const QUERY_EXECUTION_TIME: &str = "db.query.execution_time_ms";

/// Descriptions of the recorder's instruments
pub const QUERY_METRICS: [MetricDescriptor; 3] = [
    MetricDescriptor {
        name: QUERIES_TOTAL,
        kind: MetricKind::Counter,
        help: "Total number of database queries executed",
        base_unit: None,
    },
    MetricDescriptor {
        name: QUERY_DURATION,
        kind: MetricKind::Distribution,
        help: "Database query execution time",
        base_unit: Some("milliseconds"),
    },
    MetricDescriptor {
        name: QUERY_EXECUTION_TIME,
        kind: MetricKind::Distribution,
        help: "Query execution time distribution",
        base_unit: Some("milliseconds"),
    },
];

/// Span tag keys
pub mod tags {
    pub const DB_SYSTEM: &str = "db.system";
    pub const DB_OPERATION: &str = "db.operation";
    pub const DB_STATEMENT: &str = "db.statement";
    pub const CODE_LOCATION: &str = "code.location";
    pub const DB_EXECUTION_TIME_MS: &str = "db.execution_time_ms";
}

/// Drives the metric, log and trace sinks for each executed statement
pub struct Recorder {
    metrics: Arc<dyn MetricSink>,
    logs: Arc<dyn LogSink>,
    traces: Arc<dyn TraceSink>,
    db_system: String,
    datasource: Option<String>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("db_system", &self.db_system)
            .field("datasource", &self.datasource)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    pub fn new(
        metrics: Arc<dyn MetricSink>,
        logs: Arc<dyn LogSink>,
        traces: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            metrics,
            logs,
            traces,
            db_system: DEFAULT_DB_SYSTEM.to_string(),
            datasource: None,
        }
    }

    /// Value reported in the `db.system` span tag
    pub fn with_db_system(mut self, db_system: impl Into<String>) -> Self {
        self.db_system = db_system.into();
        self
    }

    /// Adds a `datasource` field to every log record
    pub fn with_datasource(mut self, name: impl Into<String>) -> Self {
        self.datasource = Some(name.into());
        self
    }

    pub fn db_system(&self) -> &str {
        &self.db_system
    }

    /// Record one executed statement to every sink
    pub fn record(&self, event: &ExecutedStatementEvent<'_>) {
        let location = event.location();
        let query_type = event.statement_type().as_str();

        self.record_metrics(event, query_type, &location);
        self.emit_log(event, query_type, &location);
        self.tag_span(event, query_type, &location);
    }

    fn record_metrics(&self, event: &ExecutedStatementEvent<'_>, query_type: &str, location: &str) {
        let by_type = [("query_type", query_type), ("location", location)];
        let query_label = truncate(event.normalized_text(), METRIC_QUERY_LABEL_MAX);
        let by_query = [("normalized_query", query_label.as_ref()), ("location", location)];
        let elapsed = event.elapsed_ms();

        isolate("metrics", || self.metrics.increment_counter(QUERIES_TOTAL, &by_type));
        isolate("metrics", || {
            self.metrics
                .record_distribution(QUERY_DURATION, &by_type, elapsed, &LATENCY_PERCENTILES)
        });
        isolate("metrics", || {
            self.metrics
                .record_distribution(QUERY_EXECUTION_TIME, &by_query, elapsed, &[])
        });
    }

    fn emit_log(&self, event: &ExecutedStatementEvent<'_>, query_type: &str, location: &str) {
        let elapsed = event.elapsed_ms();
        let slow = elapsed > SLOW_QUERY_THRESHOLD_MS;

        let mut fields: Vec<Field<'_>> = vec![
            (keys::QUERY, truncate(event.raw_text(), TEXT_FIELD_MAX).into_owned().into()),
            (
                keys::NORMALIZED_QUERY,
                truncate(event.normalized_text(), TEXT_FIELD_MAX).into_owned().into(),
            ),
            (keys::QUERY_TYPE, query_type.into()),
            (keys::EXECUTION_TIME_MS, elapsed.into()),
            (keys::LOCATION, location.into()),
            (keys::SLOW_QUERY, slow.into()),
        ];
        if let Some(index) = event.batch_index() {
            fields.push((keys::BATCH_INDEX, (index as u64).into()));
        }
        if let Some(datasource) = &self.datasource {
            fields.push((keys::DATASOURCE, datasource.as_str().into()));
        }

        let message = if slow {
            format!(
                "Slow query detected: {} ms | {} | {}",
                elapsed,
                location,
                event.normalized_text()
            )
        } else {
            format!(
                "Query executed: {} ms | {} | {}",
                elapsed,
                location,
                event.normalized_text()
            )
        };
        let severity = Severity::for_execution(slow);

        isolate("log", || self.logs.emit(severity, &fields, &message));
    }

    fn tag_span(&self, event: &ExecutedStatementEvent<'_>, query_type: &str, location: &str) {
        let span = match panic::catch_unwind(AssertUnwindSafe(|| self.traces.current_span())) {
            Ok(span) => span,
            Err(_) => {
                warn!(target: "querylens::recorder", sink = "trace", "telemetry sink panicked");
                return;
            }
        };
        // No active trace context is not an error
        let Some(mut span) = span else {
            return;
        };

        let statement = truncate(event.normalized_text(), TEXT_FIELD_MAX);
        let elapsed = event.elapsed_ms().to_string();
        let span_tags: [(&str, &str); 5] = [
            (tags::DB_SYSTEM, self.db_system.as_str()),
            (tags::DB_OPERATION, query_type),
            (tags::DB_STATEMENT, statement.as_ref()),
            (tags::CODE_LOCATION, location),
            (tags::DB_EXECUTION_TIME_MS, elapsed.as_str()),
        ];

        for (key, value) in span_tags {
            isolate("trace", || span.set_tag(key, value));
        }
    }
}

/// Run one sink call, swallowing errors and panics
fn isolate<F>(sink: &'static str, call: F)
where
    F: FnOnce() -> SinkResult,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::trace!(target: "querylens::recorder", sink, %error, "telemetry sink call failed");
        }
        Err(_) => {
            warn!(target: "querylens::recorder", sink, "telemetry sink panicked");
        }
    }
}

//! Telemetry sink interfaces
//!
//! The recorder only talks to backends through these narrow traits:
//! increment a counter, record a distribution sample, emit a structured log
//! line, tag the active span. Implementations live in [`crate::metrics`],
//! [`crate::log_sink`] and [`crate::otlp_exporter`].

use std::fmt;
use thiserror::Error;

/// Failure reported by a sink call
///
/// The recorder catches these per call; they never reach the code that
/// executed the statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("metric sink failure: {0}")]
    Metric(String),

    #[error("log sink failure: {0}")]
    Log(String),

    #[error("trace sink failure: {0}")]
    Trace(String),

    #[error("sink state poisoned: {0}")]
    Poisoned(&'static str),
}

pub type SinkResult = Result<(), SinkError>;

/// Metric label as (key, value)
pub type Label<'a> = (&'a str, &'a str);

/// Counter and distribution capability of a metrics backend
pub trait MetricSink: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[Label<'_>]) -> SinkResult;

    /// Record one sample in milliseconds
    ///
    /// `percentiles` lists the quantiles (0.0..=1.0) the backend should
    /// publish for this series; empty means count/sum/max only.
    fn record_distribution(
        &self,
        name: &str,
        labels: &[Label<'_>],
        value_ms: u64,
        percentiles: &[f64],
    ) -> SinkResult;
}

/// Log severity used by the recorder: routine or slow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warn,
}

impl Severity {
    /// Severity of an execution, given whether it crossed the slow threshold
    pub fn for_execution(slow: bool) -> Self {
        if slow {
            Self::Warn
        } else {
            Self::Debug
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Warn => "warn",
        })
    }
}

/// Value of a structured log field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    U64(u64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::U64(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Structured log field as (key, value)
pub type Field<'a> = (&'a str, FieldValue);

/// Structured logging capability
pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, fields: &[Field<'_>], message: &str) -> SinkResult;
}

/// Handle on the currently active span
pub trait SpanTagger {
    fn set_tag(&mut self, key: &str, value: &str) -> SinkResult;
}

/// Access to the active trace context
pub trait TraceSink: Send + Sync {
    /// The active span, or `None` when no trace context is active
    fn current_span(&self) -> Option<Box<dyn SpanTagger + '_>>;
}

/// Log sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {
    fn emit(&self, _severity: Severity, _fields: &[Field<'_>], _message: &str) -> SinkResult {
        Ok(())
    }
}

/// Trace sink with no active span, ever
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn current_span(&self) -> Option<Box<dyn SpanTagger + '_>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_display() {
        assert_eq!(
            SinkError::Metric("registry full".into()).to_string(),
            "metric sink failure: registry full"
        );
        assert_eq!(
            SinkError::Poisoned("metrics registry").to_string(),
            "sink state poisoned: metrics registry"
        );
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::from("x"), FieldValue::Str("x".into()));
        assert_eq!(FieldValue::from(7u64), FieldValue::U64(7));
        assert_eq!(FieldValue::from(true).to_string(), "true");
        assert_eq!(FieldValue::from(String::from("q")).to_string(), "q");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warn > Severity::Debug);
        assert_eq!(Severity::Warn.to_string(), "warn");
        assert_eq!(Severity::Debug.to_string(), "debug");
    }

    #[test]
    fn test_severity_for_execution() {
        assert_eq!(Severity::for_execution(true), Severity::Warn);
        assert_eq!(Severity::for_execution(false), Severity::Debug);
    }

    #[test]
    fn test_noop_sinks() {
        assert!(NoopLogSink.emit(Severity::Debug, &[], "x").is_ok());
        assert!(NoopTraceSink.current_span().is_none());
    }
}

//! Querylens - SQL query observability for Rust data-access layers
//!
//! Every executed statement is normalized, classified, attributed to the
//! application code that issued it and fanned out to three independent
//! sinks: metrics, structured logs and the active trace span. A failing
//! sink never affects the others or the statement's own result.
//!
//! ```no_run
//! use querylens::{
//!     call_site::CallSiteResolver, interceptor::Interceptor, log_sink::TracingLogSink,
//!     metrics::MetricsRegistry, recorder::Recorder, sink::NoopTraceSink,
//!     stack_unwind::BacktraceInspector,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let recorder = Recorder::new(
//!     MetricsRegistry::global(),
//!     Arc::new(TracingLogSink),
//!     Arc::new(NoopTraceSink),
//! );
//! let interceptor = Interceptor::new(
//!     recorder,
//!     CallSiteResolver::default(),
//!     Arc::new(BacktraceInspector::default()),
//! );
//! interceptor.observe(&["SELECT * FROM orders WHERE id = 7"], Duration::from_millis(12));
//! ```

pub mod call_site;
pub mod cli;
pub mod config;
pub mod event;
pub mod interceptor;
pub mod log_sink;
pub mod metrics;
pub mod normalize;
pub mod otlp_exporter;
pub mod recorder;
pub mod replay;
pub mod sink;
pub mod stack_unwind;

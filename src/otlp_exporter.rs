//! OpenTelemetry integration
//!
//! - [`OtelTraceSink`] tags whatever span is active in the current
//!   OpenTelemetry context; with no active span it does nothing.
//! - [`OtlpExporter`] sets up an OTLP pipeline (Jaeger, Tempo, ...) and runs
//!   work inside a client span so the sink has something to tag.
//!
//! # Example
//!
//! ```bash
//! querylens replay queries.jsonl --otlp-endpoint http://localhost:4317 --otlp-service-name orders
//! ```

#[cfg(feature = "otlp")]
use crate::sink::{SinkResult, SpanTagger, TraceSink};
#[cfg(feature = "otlp")]
use anyhow::Result;
#[cfg(feature = "otlp")]
use opentelemetry::{
    trace::{SpanKind, TraceContextExt, Tracer, TracerProvider as _},
    Context, KeyValue,
};
#[cfg(feature = "otlp")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{
    trace::{BatchSpanProcessor, SdkTracerProvider as TracerProvider},
    Resource,
};
#[cfg(feature = "otlp")]
use std::sync::atomic::{AtomicBool, Ordering};

/// Configuration for OTLP exporter
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    /// OTLP endpoint URL (e.g., "http://localhost:4317")
    pub endpoint: String,
    /// Service name for traces
    pub service_name: String,
    /// Resource attribute `db.system`
    pub db_system: String,
    /// Resource attribute `datasource.name`
    pub datasource_name: String,
}

/// Trace sink over the current OpenTelemetry context
#[cfg(feature = "otlp")]
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelTraceSink;

#[cfg(feature = "otlp")]
struct ActiveSpan {
    cx: Context,
}

#[cfg(feature = "otlp")]
impl SpanTagger for ActiveSpan {
    fn set_tag(&mut self, key: &str, value: &str) -> SinkResult {
        self.cx
            .span()
            .set_attribute(KeyValue::new(key.to_string(), value.to_string()));
        Ok(())
    }
}

#[cfg(feature = "otlp")]
impl TraceSink for OtelTraceSink {
    fn current_span(&self) -> Option<Box<dyn SpanTagger + '_>> {
        let cx = Context::current();
        if !cx.has_active_span() {
            return None;
        }
        Some(Box::new(ActiveSpan { cx }))
    }
}

/// OTLP exporter for query spans
#[cfg(feature = "otlp")]
pub struct OtlpExporter {
    _runtime: tokio::runtime::Runtime, // Tokio runtime for async OTLP operations
    provider: TracerProvider,
    tracer: opentelemetry_sdk::trace::Tracer,
    shut_down: AtomicBool,
}

#[cfg(feature = "otlp")]
impl OtlpExporter {
    /// Create a new OTLP exporter
    pub fn new(config: OtlpConfig) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| anyhow::anyhow!("Failed to create Tokio runtime: {}", e))?;

        // Build OTLP exporter within the runtime context
        let (provider, tracer) = runtime.block_on(async {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&config.endpoint)
                .build()?;

            let span_processor = BatchSpanProcessor::builder(exporter).build();

            let resource = Resource::builder()
                .with_service_name(config.service_name.clone())
                .with_attributes(vec![
                    KeyValue::new("db.system", config.db_system.clone()),
                    KeyValue::new("datasource.name", config.datasource_name.clone()),
                ])
                .build();

            let provider = TracerProvider::builder()
                .with_span_processor(span_processor)
                .with_resource(resource)
                .build();

            let tracer = provider.tracer("querylens");

            Ok::<_, anyhow::Error>((provider, tracer))
        })?;

        Ok(OtlpExporter {
            _runtime: runtime,
            provider,
            tracer,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Run `work` inside a client span made current for its duration
    pub fn in_span<T>(&self, name: &str, work: impl FnOnce() -> T) -> T {
        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Client)
            .start(&self.tracer);

        let cx = Context::current_with_span(span);
        let result = {
            let _guard = cx.clone().attach();
            work()
        };
        cx.span().end();
        result
    }

    /// Flush pending spans and shut the pipeline down
    ///
    /// Only the first call reaches the provider; drop calls this too.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.provider.shutdown() {
            tracing::debug!(error = %e, "OTLP provider shutdown failed");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

#[cfg(feature = "otlp")]
impl Drop for OtlpExporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Stub implementation when OTLP feature is disabled
#[cfg(not(feature = "otlp"))]
pub struct OtlpExporter;

#[cfg(not(feature = "otlp"))]
impl OtlpExporter {
    pub fn new(_config: OtlpConfig) -> anyhow::Result<Self> {
        anyhow::bail!("OTLP support not compiled in. Enable the 'otlp' feature.");
    }

    pub fn in_span<T>(&self, _name: &str, work: impl FnOnce() -> T) -> T {
        work()
    }

    pub fn shutdown(&self) {}

    pub fn is_shut_down(&self) -> bool {
        true
    }
}

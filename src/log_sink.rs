//! Structured query log through `tracing`
//!
//! Query records go to target [`LOG_TARGET`] so they can be routed or
//! filtered apart from the crate's own diagnostics, e.g.
//! `RUST_LOG=query_observability=debug`.

use crate::sink::{Field, FieldValue, LogSink, Severity, SinkResult};

/// `tracing` target of every query record
pub const LOG_TARGET: &str = "query_observability";

/// Field keys emitted by the recorder
pub mod keys {
    pub const QUERY: &str = "query";
    pub const NORMALIZED_QUERY: &str = "normalized_query";
    pub const QUERY_TYPE: &str = "query_type";
    pub const EXECUTION_TIME_MS: &str = "execution_time_ms";
    pub const LOCATION: &str = "location";
    pub const SLOW_QUERY: &str = "slow_query";
    pub const BATCH_INDEX: &str = "batch_index";
    pub const DATASOURCE: &str = "datasource";

    pub(crate) const ALL: [&str; 8] = [
        QUERY,
        NORMALIZED_QUERY,
        QUERY_TYPE,
        EXECUTION_TIME_MS,
        LOCATION,
        SLOW_QUERY,
        BATCH_INDEX,
        DATASOURCE,
    ];
}

/// Field lookup over the slice handed to [`LogSink::emit`]
struct Fields<'a>(&'a [Field<'a>]);

impl Fields<'_> {
    fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    fn text(&self, key: &str) -> String {
        self.get(key).map(ToString::to_string).unwrap_or_default()
    }

    fn number(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(FieldValue::U64(n)) => Some(*n),
            _ => None,
        }
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(FieldValue::Bool(true)))
    }

    /// Fields outside the known key set, as `key=value` pairs
    fn extra(&self) -> String {
        self.0
            .iter()
            .filter(|(k, _)| !keys::ALL.contains(k))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// tracing needs a constant level per callsite
macro_rules! query_event {
    ($level:expr, $fields:expr, $message:expr) => {
        tracing::event!(
            target: LOG_TARGET,
            $level,
            query = %$fields.text(keys::QUERY),
            normalized_query = %$fields.text(keys::NORMALIZED_QUERY),
            query_type = %$fields.text(keys::QUERY_TYPE),
            execution_time_ms = $fields.number(keys::EXECUTION_TIME_MS),
            location = %$fields.text(keys::LOCATION),
            slow_query = $fields.flag(keys::SLOW_QUERY),
            batch_index = $fields.number(keys::BATCH_INDEX),
            datasource = %$fields.text(keys::DATASOURCE),
            extra = %$fields.extra(),
            "{}",
            $message
        )
    };
}

/// Log sink backed by the `tracing` macros
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, severity: Severity, fields: &[Field<'_>], message: &str) -> SinkResult {
        let fields = Fields(fields);
        match severity {
            Severity::Debug => query_event!(tracing::Level::DEBUG, fields, message),
            Severity::Warn => query_event!(tracing::Level::WARN, fields, message),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::Visit;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    type Captured = Arc<Mutex<Vec<(tracing::Level, String, BTreeMap<String, String>)>>>;

    #[derive(Default)]
    struct Collector(BTreeMap<String, String>);

    impl Visit for Collector {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    struct CaptureLayer(Captured);

    impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut collector = Collector::default();
            event.record(&mut collector);
            self.0.lock().unwrap().push((
                *event.metadata().level(),
                event.metadata().target().to_string(),
                collector.0,
            ));
        }
    }

    /// Events emitted on this thread while `f` runs: level, target, fields
    pub(crate) fn capture<F: FnOnce()>(f: F) -> Vec<(tracing::Level, String, BTreeMap<String, String>)> {
        let captured: Captured = Arc::default();
        let subscriber = tracing_subscriber::registry().with(CaptureLayer(captured.clone()));
        tracing::subscriber::with_default(subscriber, f);
        let events = captured.lock().unwrap().clone();
        events
    }

    #[test]
    fn test_emit_warn_with_fields() {
        let fields: Vec<Field<'_>> = vec![
            (keys::QUERY, "SELECT 1".into()),
            (keys::QUERY_TYPE, "SELECT".into()),
            (keys::EXECUTION_TIME_MS, 150u64.into()),
            (keys::SLOW_QUERY, true.into()),
            (keys::LOCATION, "OrderService.create:10".into()),
        ];
        let events = capture(|| {
            TracingLogSink
                .emit(Severity::Warn, &fields, "Slow query detected")
                .unwrap();
        });

        assert_eq!(events.len(), 1);
        let (level, target, recorded) = &events[0];
        assert_eq!(*level, tracing::Level::WARN);
        assert_eq!(target, LOG_TARGET);
        assert_eq!(recorded["query"], "SELECT 1");
        assert_eq!(recorded["execution_time_ms"], "150");
        assert!(!recorded.contains_key("batch_index"));
        assert_eq!(recorded["slow_query"], "true");
        assert_eq!(recorded["location"], "OrderService.create:10");
        assert_eq!(recorded["message"], "Slow query detected");
    }

    #[test]
    fn test_emit_debug_level() {
        let events = capture(|| {
            TracingLogSink.emit(Severity::Debug, &[], "Query executed").unwrap();
        });
        assert_eq!(events[0].0, tracing::Level::DEBUG);
        assert_eq!(events[0].2["slow_query"], "false");
    }

    #[test]
    fn test_unknown_fields_go_to_extra() {
        let fields: Vec<Field<'_>> = vec![("tenant", "acme".into()), ("shard", 3u64.into())];
        let events = capture(|| {
            TracingLogSink.emit(Severity::Debug, &fields, "m").unwrap();
        });
        assert_eq!(events[0].0, tracing::Level::DEBUG);
        assert_eq!(events[0].2["extra"], "tenant=acme shard=3");
    }
}

//! In-process metrics registry
//!
//! Query counters and latency distributions go through the `metrics` facade
//! into two backends: a `metrics-exporter-prometheus` recorder that owns the
//! exposition text (summaries with published quantiles), and `metrics-util`
//! storage the CLI summary and tests read back from. The recorder only writes
//! through [`MetricSink`].

use crate::recorder::LATENCY_PERCENTILES;
use crate::sink::{Label, MetricSink, SinkError, SinkResult};
use ::metrics::{counter, gauge, histogram, Key, KeyName, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use metrics_util::registry::{AtomicStorage, Registry};
use metrics_util::storage::Summary;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Gauge: number of distinct `location` label values seen
pub const UNIQUE_LOCATIONS_GAUGE: &str = "db.queries.unique_locations";

/// Label whose distinct values feed [`UNIQUE_LOCATIONS_GAUGE`]
pub const LOCATION_LABEL: &str = "location";

/// Distribution samples the exporter buffers before folding them into its
/// summaries; nothing else drains them when exposition is never rendered
const UPKEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Distribution,
    Gauge,
}

/// Static description of an instrument, rendered as `# HELP`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    /// A `metrics::Unit` name such as `"milliseconds"`
    pub base_unit: Option<&'static str>,
}

const UNIQUE_LOCATIONS: MetricDescriptor = MetricDescriptor {
    name: UNIQUE_LOCATIONS_GAUGE,
    kind: MetricKind::Gauge,
    help: "Number of distinct query call sites observed",
    base_unit: None,
};

/// Metric name plus ordered labels
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Value of a label, if present
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl From<&Key> for SeriesKey {
    fn from(key: &Key) -> Self {
        Self {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect(),
        }
    }
}

fn owned_labels(labels: &[Label<'_>]) -> Vec<::metrics::Label> {
    labels
        .iter()
        .map(|(k, v)| ::metrics::Label::new((*k).to_string(), (*v).to_string()))
        .collect()
}

fn series_key(name: &str, labels: &[Label<'_>]) -> Key {
    Key::from_parts(name.to_string(), owned_labels(labels))
}

fn location_of(key: &Key) -> Option<&str> {
    key.labels()
        .find(|label| label.key() == LOCATION_LABEL)
        .map(|label| label.value())
}

/// Readback state of one distribution series
///
/// Quantiles come from the DDSketch `Summary`, so memory per series stays
/// bounded. Count, sum and max are exact.
struct SeriesSummary {
    sketch: Summary,
    sum_ms: u64,
    max_ms: u64,
    quantiles: Vec<f64>,
}

impl SeriesSummary {
    fn new() -> Self {
        Self {
            sketch: Summary::with_defaults(),
            sum_ms: 0,
            max_ms: 0,
            quantiles: Vec::new(),
        }
    }

    fn record(&mut self, value_ms: u64, percentiles: &[f64]) {
        self.sketch.add(value_ms as f64);
        self.sum_ms = self.sum_ms.saturating_add(value_ms);
        self.max_ms = self.max_ms.max(value_ms);

        for &p in percentiles {
            if (0.0..=1.0).contains(&p) && !self.quantiles.contains(&p) {
                self.quantiles.push(p);
            }
        }
    }

    fn snapshot(&self, key: &Key) -> DistributionSnapshot {
        let count = self.sketch.count() as u64;

        let mut published = self.quantiles.clone();
        published.sort_by(|a, b| a.total_cmp(b));

        let quantiles = published
            .into_iter()
            .map(|quantile| Quantile {
                quantile,
                value_ms: self
                    .sketch
                    .quantile(quantile)
                    .map_or(0, |v| (v.max(0.0).round() as u64).min(self.max_ms)),
            })
            .collect();

        DistributionSnapshot {
            series: SeriesKey::from(key),
            count,
            sum_ms: self.sum_ms,
            max_ms: self.max_ms,
            mean_ms: if count > 0 {
                self.sum_ms as f64 / count as f64
            } else {
                0.0
            },
            quantiles,
        }
    }
}

/// Published percentile of a distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quantile {
    pub quantile: f64,
    pub value_ms: u64,
}

/// Point-in-time view of one distribution series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSnapshot {
    pub series: SeriesKey,
    pub count: u64,
    pub sum_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub quantiles: Vec<Quantile>,
}

impl DistributionSnapshot {
    /// Value for a published quantile, if it was requested
    pub fn quantile(&self, quantile: f64) -> Option<u64> {
        self.quantiles
            .iter()
            .find(|q| (q.quantile - quantile).abs() < f64::EPSILON)
            .map(|q| q.value_ms)
    }
}

/// Point-in-time view of one counter series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub series: SeriesKey,
    pub value: u64,
}

/// Thread-safe counter and distribution store
pub struct MetricsRegistry {
    prometheus: PrometheusRecorder,
    exposition: PrometheusHandle,
    counters: Registry<Key, AtomicStorage>,
    summaries: Mutex<HashMap<Key, SeriesSummary>>,
    samples: AtomicU64,
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("counters", &self.counters.get_counter_handles().len())
            .field("summaries", &self.lock_tolerant().len())
            .finish_non_exhaustive()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let prometheus = PrometheusBuilder::new()
            .set_quantiles(&LATENCY_PERCENTILES)
            .unwrap_or_else(|_| PrometheusBuilder::new())
            .build_recorder();
        let exposition = prometheus.handle();

        let registry = Self {
            prometheus,
            exposition,
            counters: Registry::atomic(),
            summaries: Mutex::new(HashMap::new()),
            samples: AtomicU64::new(0),
        };
        registry.describe(UNIQUE_LOCATIONS);
        registry
    }

    /// Registry pre-loaded with instrument descriptions
    pub fn with_descriptors(descriptors: &[MetricDescriptor]) -> Self {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.describe(*descriptor);
        }
        registry
    }

    /// The process-wide registry, created on first use and never torn down
    pub fn global() -> Arc<MetricsRegistry> {
        static GLOBAL: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                Arc::new(MetricsRegistry::with_descriptors(&crate::recorder::QUERY_METRICS))
            })
            .clone()
    }

    pub fn describe(&self, descriptor: MetricDescriptor) {
        let name = KeyName::from(descriptor.name);
        let unit = descriptor.base_unit.and_then(Unit::from_string);
        let help = SharedString::from(descriptor.help);
        match descriptor.kind {
            MetricKind::Counter => self.prometheus.describe_counter(name, unit, help),
            MetricKind::Distribution => self.prometheus.describe_histogram(name, unit, help),
            MetricKind::Gauge => self.prometheus.describe_gauge(name, unit, help),
        }
    }

    fn summaries(&self) -> Result<MutexGuard<'_, HashMap<Key, SeriesSummary>>, SinkError> {
        self.summaries
            .lock()
            .map_err(|_| SinkError::Poisoned("metrics registry"))
    }

    // A panic mid-record leaves every sketch usable, so snapshots ignore poisoning
    fn lock_tolerant(&self) -> MutexGuard<'_, HashMap<Key, SeriesSummary>> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn counter_value(&self, name: &str, labels: &[Label<'_>]) -> u64 {
        self.counters
            .get_counter_handles()
            .get(&series_key(name, labels))
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    pub fn counters(&self) -> Vec<CounterSnapshot> {
        let mut snapshots: Vec<CounterSnapshot> = self
            .counters
            .get_counter_handles()
            .iter()
            .map(|(key, counter)| CounterSnapshot {
                series: SeriesKey::from(key),
                value: counter.load(Ordering::Relaxed),
            })
            .collect();
        snapshots.sort_by(|a, b| a.series.cmp(&b.series));
        snapshots
    }

    pub fn distribution(&self, name: &str, labels: &[Label<'_>]) -> Option<DistributionSnapshot> {
        let key = series_key(name, labels);
        self.lock_tolerant().get(&key).map(|s| s.snapshot(&key))
    }

    pub fn distributions(&self) -> Vec<DistributionSnapshot> {
        let mut snapshots: Vec<DistributionSnapshot> = self
            .lock_tolerant()
            .iter()
            .map(|(key, s)| s.snapshot(key))
            .collect();
        snapshots.sort_by(|a, b| a.series.cmp(&b.series));
        snapshots
    }

    /// Current value of [`UNIQUE_LOCATIONS_GAUGE`]
    pub fn unique_locations(&self) -> usize {
        let counters = self.counters.get_counter_handles();
        let summaries = self.lock_tolerant();
        counters
            .keys()
            .chain(summaries.keys())
            .filter_map(location_of)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Prometheus text exposition of every series
    ///
    /// Distributions render as summaries with the published quantiles plus
    /// `_sum` and `_count`. Values stay in milliseconds.
    pub fn render_prometheus(&self) -> String {
        let locations = self.unique_locations() as f64;
        ::metrics::with_local_recorder(&self.prometheus, || {
            gauge!(UNIQUE_LOCATIONS_GAUGE).set(locations);
        });
        self.exposition.render()
    }
}

impl MetricSink for MetricsRegistry {
    fn increment_counter(&self, name: &str, labels: &[Label<'_>]) -> SinkResult {
        let key = series_key(name, labels);
        self.counters
            .get_or_create_counter(&key, |counter| counter.fetch_add(1, Ordering::Relaxed));

        ::metrics::with_local_recorder(&self.prometheus, || {
            counter!(name.to_string(), owned_labels(labels)).increment(1);
        });
        Ok(())
    }

    /// `percentiles` selects what the readback snapshot reports; the
    /// exposition publishes [`LATENCY_PERCENTILES`] for every distribution.
    fn record_distribution(
        &self,
        name: &str,
        labels: &[Label<'_>],
        value_ms: u64,
        percentiles: &[f64],
    ) -> SinkResult {
        self.summaries()?
            .entry(series_key(name, labels))
            .or_insert_with(SeriesSummary::new)
            .record(value_ms, percentiles);

        ::metrics::with_local_recorder(&self.prometheus, || {
            histogram!(name.to_string(), owned_labels(labels)).record(value_ms as f64);
        });
        if self.samples.fetch_add(1, Ordering::Relaxed) % UPKEEP_INTERVAL == UPKEEP_INTERVAL - 1 {
            self.exposition.run_upkeep();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [Label<'static>; 2] = [("query_type", "SELECT"), ("location", "OrderService.create:10")];

    /// Value of the first exposition line starting with `prefix`
    fn sample(text: &str, prefix: &str) -> Option<f64> {
        text.lines()
            .find(|line| line.starts_with(prefix))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_counter_increments() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("db.queries.total", &LABELS).unwrap();
        registry.increment_counter("db.queries.total", &LABELS).unwrap();
        assert_eq!(registry.counter_value("db.queries.total", &LABELS), 2);
        assert_eq!(registry.counter_value("db.queries.total", &[]), 0);
        assert_eq!(registry.counters().len(), 1);
        assert_eq!(registry.counters()[0].series.label("query_type"), Some("SELECT"));
    }

    #[test]
    fn test_distribution_quantiles() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry
                .record_distribution("db.query.duration", &LABELS, v, &[0.5, 0.95, 0.99])
                .unwrap();
        }
        let snap = registry.distribution("db.query.duration", &LABELS).unwrap();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.sum_ms, 5050);
        assert_eq!(snap.max_ms, 100);
        assert!((snap.mean_ms - 50.5).abs() < 1e-9);

        let p50 = snap.quantile(0.5).unwrap();
        let p95 = snap.quantile(0.95).unwrap();
        let p99 = snap.quantile(0.99).unwrap();
        assert!((49..=51).contains(&p50), "p50 = {}", p50);
        assert!((94..=96).contains(&p95), "p95 = {}", p95);
        assert!((98..=100).contains(&p99), "p99 = {}", p99);
    }

    #[test]
    fn test_quantiles_never_exceed_max() {
        let registry = MetricsRegistry::new();
        for v in [10, 30] {
            registry
                .record_distribution("d", &[], v, &[0.5, 0.99])
                .unwrap();
        }
        let snap = registry.distribution("d", &[]).unwrap();
        for q in &snap.quantiles {
            assert!((10..=30).contains(&q.value_ms), "{:?}", q);
        }
    }

    #[test]
    fn test_distribution_without_percentiles() {
        let registry = MetricsRegistry::new();
        registry
            .record_distribution("db.query.execution_time_ms", &LABELS, 7, &[])
            .unwrap();
        let snap = registry
            .distribution("db.query.execution_time_ms", &LABELS)
            .unwrap();
        assert!(snap.quantiles.is_empty());
        assert_eq!(snap.quantile(0.5), None);
        assert_eq!(snap.count, 1);
    }

    #[test]
    fn test_invalid_percentiles_ignored() {
        let registry = MetricsRegistry::new();
        registry
            .record_distribution("d", &[], 3, &[1.5, -0.1, 0.5, 0.5])
            .unwrap();
        let snap = registry.distribution("d", &[]).unwrap();
        assert_eq!(snap.quantiles.len(), 1);
        assert_eq!(snap.quantile(0.5), Some(3));
    }

    #[test]
    fn test_zero_latency_recorded() {
        let registry = MetricsRegistry::new();
        registry.record_distribution("d", &[], 0, &[0.5]).unwrap();
        let snap = registry.distribution("d", &[]).unwrap();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.quantile(0.5), Some(0));
    }

    #[test]
    fn test_unique_locations_gauge() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("c", &[("location", "A.a:1")]).unwrap();
        registry.increment_counter("c", &[("location", "A.a:1")]).unwrap();
        registry
            .record_distribution("d", &[("location", "B.b:2")], 1, &[])
            .unwrap();
        registry
            .record_distribution("d", &[("location", "A.a:1")], 1, &[])
            .unwrap();
        registry.increment_counter("c", &[("query_type", "SELECT")]).unwrap();
        assert_eq!(registry.unique_locations(), 2);
    }

    #[test]
    fn test_render_prometheus() {
        let registry = MetricsRegistry::with_descriptors(&[MetricDescriptor {
            name: "db.queries.total",
            kind: MetricKind::Counter,
            help: "Total number of database queries executed",
            base_unit: None,
        }]);
        registry.increment_counter("db.queries.total", &LABELS).unwrap();
        registry
            .record_distribution("db.query.duration", &LABELS, 20, &[0.5])
            .unwrap();

        let text = registry.render_prometheus();
        assert!(text.contains("# HELP db_queries_total Total number of database queries executed"));
        assert!(text.contains("# TYPE db_queries_total counter"));

        let counter_line = text
            .lines()
            .find(|line| line.starts_with("db_queries_total{"))
            .unwrap();
        assert!(counter_line.contains("query_type=\"SELECT\""));
        assert!(counter_line.contains("location=\"OrderService.create:10\""));
        assert!(counter_line.ends_with(" 1"));

        assert!(text.contains("# TYPE db_query_duration summary"));
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains("quantile=\"0.99\""));
        assert_eq!(sample(&text, "db_query_duration_count{"), Some(1.0));
        assert_eq!(sample(&text, "db_queries_unique_locations"), Some(1.0));
    }

    #[test]
    fn test_render_prometheus_escapes_label_values() {
        let registry = MetricsRegistry::new();
        registry
            .increment_counter("c", &[("normalized_query", "SELECT \"a\" FROM t")])
            .unwrap();
        let text = registry.render_prometheus();
        assert!(text.contains(r#"normalized_query="SELECT \"a\" FROM t""#), "{}", text);
    }

    #[test]
    fn test_poisoned_store_reads_but_rejects_writes() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.record_distribution("d", &[], 5, &[]).unwrap();

        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.summaries.lock().unwrap();
            panic!("poison the summary store");
        })
        .join();

        assert_eq!(registry.distribution("d", &[]).unwrap().count, 1);
        assert_eq!(registry.distributions().len(), 1);
        assert_eq!(
            registry.record_distribution("d", &[], 5, &[]),
            Err(SinkError::Poisoned("metrics registry"))
        );
        registry.increment_counter("c", &[]).unwrap();
        assert_eq!(registry.counter_value("c", &[]), 1);
    }

    #[test]
    fn test_exposition_survives_upkeep() {
        let registry = MetricsRegistry::new();
        for v in 0..(UPKEEP_INTERVAL * 2 + 3) {
            registry
                .record_distribution("d", &[], v % 50, &LATENCY_PERCENTILES)
                .unwrap();
        }
        let text = registry.render_prometheus();
        assert_eq!(sample(&text, "d_count"), Some((UPKEEP_INTERVAL * 2 + 3) as f64));
        assert_eq!(
            registry.distribution("d", &[]).unwrap().count,
            UPKEEP_INTERVAL * 2 + 3
        );
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        registry.increment_counter("c", &[]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.counter_value("c", &[]), 1000);
    }
}

//! Replay of recorded statement executions
//!
//! Reads a JSON Lines file where each line is one logical execution:
//!
//! ```json
//! {"statements": ["SELECT * FROM orders WHERE id = 7"], "elapsed_ms": 12,
//!  "stack": [{"type_name": "shop::orders::OrderService", "method_name": "find", "line_number": 31}]}
//! ```
//!
//! and drives each one through an [`Interceptor`] with its recorded stack.

use crate::call_site::Frame;
use crate::interceptor::Interceptor;
use crate::metrics::{DistributionSnapshot, MetricsRegistry};
use crate::recorder::{QUERIES_TOTAL, QUERY_DURATION};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One recorded logical execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub statements: Vec<String>,
    pub elapsed_ms: u64,
    /// Innermost frame first
    #[serde(default)]
    pub stack: Vec<Frame>,
}

/// Parse JSON Lines text, skipping blank lines and `#` comments
pub fn parse_replay(content: &str) -> Result<Vec<ReplayRecord>> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid replay record on line {}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Load a replay file from disk
pub fn load_replay<P: AsRef<Path>>(path: P) -> Result<Vec<ReplayRecord>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read replay file: {}", path.as_ref().display()))?;
    parse_replay(&content)
}

/// Feed every record through the interceptor, in file order
///
/// `wrap` runs around each execution; the CLI uses it to open a trace span.
pub fn replay<F>(records: &[ReplayRecord], interceptor: &Interceptor, mut wrap: F) -> usize
where
    F: FnMut(&ReplayRecord, &dyn Fn()),
{
    let mut statements = 0;
    for record in records {
        wrap(record, &|| {
            interceptor.observe_with_stack(&record.statements, record.elapsed_ms, &record.stack)
        });
        statements += record.statements.len();
    }
    statements
}

/// Per (query_type, location) summary row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub query_type: String,
    pub location: String,
    pub count: u64,
    pub total_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

impl SummaryRow {
    fn from_snapshot(snapshot: &DistributionSnapshot, count: u64) -> Self {
        Self {
            query_type: snapshot.series.label("query_type").unwrap_or_default().to_string(),
            location: snapshot.series.label("location").unwrap_or_default().to_string(),
            count,
            total_ms: snapshot.sum_ms,
            p50_ms: snapshot.quantile(0.5).unwrap_or(0),
            p95_ms: snapshot.quantile(0.95).unwrap_or(0),
            p99_ms: snapshot.quantile(0.99).unwrap_or(0),
            max_ms: snapshot.max_ms,
        }
    }
}

/// Summary rows sorted by total time (descending)
pub fn summarize(registry: &MetricsRegistry) -> Vec<SummaryRow> {
    let counters = registry.counters();
    let mut rows: Vec<SummaryRow> = registry
        .distributions()
        .iter()
        .filter(|d| d.series.name == QUERY_DURATION)
        .map(|d| {
            let count = counters
                .iter()
                .find(|c| c.series.name == QUERIES_TOTAL && c.series.labels == d.series.labels)
                .map(|c| c.value)
                .unwrap_or(d.count);
            SummaryRow::from_snapshot(d, count)
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_ms
            .cmp(&a.total_ms)
            .then_with(|| a.location.cmp(&b.location))
            .then_with(|| a.query_type.cmp(&b.query_type))
    });
    rows
}

/// Render the summary table
pub fn format_summary(rows: &[SummaryRow], unique_locations: usize) -> String {
    if rows.is_empty() {
        return "No queries recorded.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<8} {:<40} {:>8} {:>10} {:>8} {:>8} {:>8} {:>8}\n",
        "Type", "Location", "Calls", "Total ms", "p50", "p95", "p99", "Max"
    ));
    out.push_str(&"─".repeat(106));
    out.push('\n');

    for row in rows {
        out.push_str(&format!(
            "{:<8} {:<40} {:>8} {:>10} {:>8} {:>8} {:>8} {:>8}\n",
            row.query_type,
            row.location,
            row.count,
            row.total_ms,
            row.p50_ms,
            row.p95_ms,
            row.p99_ms,
            row.max_ms
        ));
    }

    out.push_str(&"─".repeat(106));
    out.push('\n');
    out.push_str(&format!("Unique query locations: {}\n", unique_locations));
    out
}

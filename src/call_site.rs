//! Call-site attribution
//!
//! Finds the application frame that issued a query by skipping frames owned
//! by the standard library, drivers, connection pools, ORMs, wrappers and the
//! instrumentation itself. Matching is plain string logic over type names so
//! it can be tested without capturing a real stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location label used when no frame is available
pub const UNKNOWN_LOCATION: &str = "unknown";

/// A single resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Fully qualified type (or module) path, e.g. `shop::orders::OrderService`
    pub type_name: String,
    /// Function or method name
    pub method_name: String,
    /// Source line, 0 when unknown
    #[serde(default)]
    pub line_number: u32,
}

impl Frame {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>, line_number: u32) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            line_number,
        }
    }

    /// Last path segment of the type name, generic arguments removed
    ///
    /// Accepts both `::` and `.` separators so frames recorded by non-Rust
    /// data-access layers (e.g. replay files) format the same way.
    pub fn simple_type_name(&self) -> &str {
        let path = match self.type_name.find('<') {
            Some(idx) => &self.type_name[..idx],
            None => self.type_name.as_str(),
        };
        let last = path.rsplit("::").next().unwrap_or(path);
        last.rsplit('.').next().unwrap_or(last)
    }

    /// `"{SimpleType}.{method}:{line}"`
    pub fn location(&self) -> String {
        format!(
            "{}.{}:{}",
            self.simple_type_name(),
            self.method_name,
            self.line_number
        )
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}:{}", self.type_name, self.method_name, self.line_number)
    }
}

/// Location label for an optional call site
pub fn location_of(call_site: Option<&Frame>) -> String {
    call_site
        .map(Frame::location)
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
}

/// A single exclusion rule checked against a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionRule {
    /// Type name starts with the given namespace
    Prefix(String),
    /// Type or method name contains the given marker anywhere
    Marker(String),
}

impl ExclusionRule {
    /// Match against a type name alone
    pub fn matches(&self, type_name: &str) -> bool {
        match self {
            Self::Prefix(prefix) => type_name.starts_with(prefix.as_str()),
            Self::Marker(marker) => type_name.contains(marker.as_str()),
        }
    }

    /// Match against a whole frame
    ///
    /// Shim and short-backtrace markers land in the method segment
    /// (`run{{vtable.shim}}`), so markers also check the method name.
    pub fn matches_frame(&self, frame: &Frame) -> bool {
        match self {
            Self::Prefix(_) => self.matches(&frame.type_name),
            Self::Marker(marker) => {
                self.matches(&frame.type_name) || frame.method_name.contains(marker.as_str())
            }
        }
    }
}

/// Namespaces that never count as application code
const DEFAULT_PREFIXES: &[&str] = &[
    // Standard library
    "std::",
    "core::",
    "alloc::",
    // Stack capture
    "backtrace::",
    // Async runtimes
    "tokio::",
    "futures::",
    "futures_core::",
    "futures_util::",
    "futures_executor::",
    // Drivers
    "sqlx::",
    "sqlx_core::",
    "sqlx_mysql::",
    "sqlx_postgres::",
    "sqlx_sqlite::",
    "mysql::",
    "mysql_async::",
    "mysql_common::",
    "postgres::",
    "tokio_postgres::",
    "rusqlite::",
    // ORMs and query builders
    "diesel::",
    "sea_orm::",
    "sea_query::",
    // Connection pools
    "r2d2::",
    "deadpool::",
    "deadpool_postgres::",
    "deadpool_sqlite::",
    "bb8::",
    // This crate
    "querylens::",
];

/// Markers left by generated shims and wrapper types
const DEFAULT_MARKERS: &[&str] = &[
    "{{vtable.shim}}",
    "__rust_begin_short_backtrace",
    "__rust_end_short_backtrace",
    "Instrumented",
];

/// Ordered, de-duplicated set of exclusion rules (OR-combined)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    rules: Vec<ExclusionRule>,
}

impl ExclusionList {
    /// An empty list: every frame counts as application code
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in Rust-native exclusion list
    pub fn rust_defaults() -> Self {
        let mut list = Self::new();
        for prefix in DEFAULT_PREFIXES {
            list.push(ExclusionRule::Prefix((*prefix).to_string()));
        }
        for marker in DEFAULT_MARKERS {
            list.push(ExclusionRule::Marker((*marker).to_string()));
        }
        list
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.push(ExclusionRule::Prefix(prefix.into()));
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.push(ExclusionRule::Marker(marker.into()));
        self
    }

    /// Append a rule, ignoring exact duplicates and empty patterns
    pub fn push(&mut self, rule: ExclusionRule) {
        let empty = match &rule {
            ExclusionRule::Prefix(s) | ExclusionRule::Marker(s) => s.is_empty(),
        };
        // An empty prefix or marker would exclude every frame
        if empty || self.rules.contains(&rule) {
            return;
        }
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if any rule matches the type name
    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(type_name))
    }

    /// True if any rule matches the frame's type name, or a marker its method
    pub fn is_frame_excluded(&self, frame: &Frame) -> bool {
        self.rules.iter().any(|rule| rule.matches_frame(frame))
    }
}

/// Resolves the application call site from an innermost-first stack
#[derive(Debug, Clone)]
pub struct CallSiteResolver {
    exclusions: ExclusionList,
}

impl Default for CallSiteResolver {
    fn default() -> Self {
        Self::new(ExclusionList::rust_defaults())
    }
}

impl CallSiteResolver {
    pub fn new(exclusions: ExclusionList) -> Self {
        Self { exclusions }
    }

    pub fn exclusions(&self) -> &ExclusionList {
        &self.exclusions
    }

    /// First frame not matched by any exclusion rule
    ///
    /// Falls back to the innermost frame (index 0) when every frame is
    /// excluded. Returns `None` only for an empty stack.
    pub fn resolve<'a>(&self, frames: &'a [Frame]) -> Option<&'a Frame> {
        frames
            .iter()
            .find(|frame| !self.exclusions.is_frame_excluded(frame))
            .or_else(|| frames.first())
    }
}

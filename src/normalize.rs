//! Query normalization and coarse statement classification
//!
//! Normalization replaces literal values with placeholders so that
//! structurally identical statements aggregate under one metric label.
//! Classification is a prefix match on the leading keyword: it feeds a
//! low-cardinality label and is not a SQL parser.

use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

/// Replacement for a quoted string literal (quotes kept)
pub const STRING_PLACEHOLDER: &str = "'?'";

/// Replacement for a standalone numeric token
pub const NUMBER_PLACEHOLDER: &str = "?";

/// Marker appended to text cut by [`truncate`]
pub const TRUNCATION_MARKER: &str = "...";

fn string_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'[^']*'").expect("string literal pattern is valid"))
}

fn numeric_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9]+\b").expect("numeric token pattern is valid"))
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Coarse statement type derived from the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Other,
}

/// Keywords checked in order; first prefix match wins
const KEYWORDS: [(&str, StatementType); 7] = [
    ("SELECT", StatementType::Select),
    ("INSERT", StatementType::Insert),
    ("UPDATE", StatementType::Update),
    ("DELETE", StatementType::Delete),
    ("CREATE", StatementType::Create),
    ("DROP", StatementType::Drop),
    ("ALTER", StatementType::Alter),
];

impl StatementType {
    /// Label value used in metrics, logs and span tags
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a SQL statement for grouping
///
/// Steps, in order:
/// 1. every `'...'` span becomes `'?'`
/// 2. every word-delimited run of digits becomes `?`
/// 3. whitespace runs collapse to a single space
/// 4. leading and trailing whitespace is trimmed
///
/// Literals go first so digits inside quotes disappear with the literal.
///
/// # Example
///
/// ```
/// use querylens::normalize::normalize;
///
/// assert_eq!(
///     normalize("SELECT * FROM t WHERE id = 42 AND name = 'bob'"),
///     "SELECT * FROM t WHERE id = ? AND name = '?'"
/// );
/// ```
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let without_strings = string_literal().replace_all(raw, STRING_PLACEHOLDER);
    let without_numbers = numeric_token().replace_all(&without_strings, NUMBER_PLACEHOLDER);
    let collapsed = whitespace_run().replace_all(&without_numbers, " ");

    collapsed.trim().to_string()
}

/// Classify a statement by its leading keyword (case-insensitive)
pub fn classify(raw: &str) -> StatementType {
    let upper = raw.trim().to_uppercase();

    KEYWORDS
        .iter()
        .find(|(keyword, _)| upper.starts_with(keyword))
        .map(|(_, kind)| *kind)
        .unwrap_or(StatementType::Other)
}

/// Cap `text` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when cut
///
/// Counts characters rather than bytes so multi-byte text is never split
/// inside a code point.
pub fn truncate(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((byte_offset, _)) => {
            let mut cut = String::with_capacity(byte_offset + TRUNCATION_MARKER.len());
            cut.push_str(&text[..byte_offset]);
            cut.push_str(TRUNCATION_MARKER);
            Cow::Owned(cut)
        }
    }
}

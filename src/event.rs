//! Executed-statement event

use crate::call_site::{location_of, Frame};
use crate::normalize::{classify, normalize, StatementType};

/// One completed statement execution, alive for a single recorder call
///
/// Borrows the statement text and call site from the interceptor; the
/// normalized text and statement type are derived on construction.
#[derive(Debug, Clone)]
pub struct ExecutedStatementEvent<'a> {
    raw_text: &'a str,
    elapsed_ms: u64,
    call_site: Option<&'a Frame>,
    batch_index: Option<usize>,
    normalized_text: String,
    statement_type: StatementType,
}

impl<'a> ExecutedStatementEvent<'a> {
    pub fn new(raw_text: &'a str, elapsed_ms: u64, call_site: Option<&'a Frame>) -> Self {
        Self {
            raw_text,
            elapsed_ms,
            call_site,
            batch_index: None,
            normalized_text: normalize(raw_text),
            statement_type: classify(raw_text),
        }
    }

    /// Mark the event as the `index`-th statement of a batch
    pub fn in_batch(mut self, index: usize) -> Self {
        self.batch_index = Some(index);
        self
    }

    pub fn raw_text(&self) -> &str {
        self.raw_text
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn call_site(&self) -> Option<&Frame> {
        self.call_site
    }

    pub fn batch_index(&self) -> Option<usize> {
        self.batch_index
    }

    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// `"{SimpleType}.{method}:{line}"`, or `"unknown"` without a call site
    pub fn location(&self) -> String {
        location_of(self.call_site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_derives_keys() {
        let site = Frame::new("shop::orders::OrderService", "create", 31);
        let event = ExecutedStatementEvent::new(
            "INSERT INTO orders (user_id, total) VALUES (5, 'abc')",
            12,
            Some(&site),
        );
        assert_eq!(event.statement_type(), StatementType::Insert);
        assert_eq!(
            event.normalized_text(),
            "INSERT INTO orders (user_id, total) VALUES (?, '?')"
        );
        assert_eq!(event.location(), "OrderService.create:31");
        assert_eq!(event.elapsed_ms(), 12);
        assert_eq!(event.batch_index(), None);
    }

    #[test]
    fn test_event_empty_text() {
        let event = ExecutedStatementEvent::new("", 0, None);
        assert_eq!(event.normalized_text(), "");
        assert_eq!(event.statement_type(), StatementType::Other);
        assert_eq!(event.location(), "unknown");
    }

    #[test]
    fn test_event_batch_index() {
        let event = ExecutedStatementEvent::new("DELETE FROM t", 1, None).in_batch(2);
        assert_eq!(event.batch_index(), Some(2));
        assert_eq!(event.raw_text(), "DELETE FROM t");
    }
}

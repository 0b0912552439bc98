//! Statement execution interception
//!
//! [`InstrumentedExecutor`] wraps any [`StatementExecutor`] and reports each
//! execution to an [`Interceptor`], which captures the stack once per
//! logical execution, resolves the call site and hands one event per
//! statement to the [`Recorder`]. The wrapped call's result passes through
//! untouched whether it succeeded or failed.

use crate::call_site::{location_of, CallSiteResolver, Frame};
use crate::config::QueryObservabilityConfig;
use crate::event::ExecutedStatementEvent;
use crate::recorder::Recorder;
use crate::stack_unwind::{BacktraceInspector, StackInspector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Convert a measured duration to whole milliseconds, saturating
pub fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Observes executed statements and feeds the recorder
pub struct Interceptor {
    recorder: Recorder,
    resolver: CallSiteResolver,
    inspector: Arc<dyn StackInspector>,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("recorder", &self.recorder)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Interceptor {
    pub fn new(
        recorder: Recorder,
        resolver: CallSiteResolver,
        inspector: Arc<dyn StackInspector>,
    ) -> Self {
        Self {
            recorder,
            resolver,
            inspector,
        }
    }

    /// Interceptor using the native stack and the configured exclusions
    ///
    /// The configured `db_system` and `datasource_name` are applied to the
    /// recorder.
    pub fn from_config(config: &QueryObservabilityConfig, recorder: Recorder) -> Self {
        let recorder = recorder
            .with_db_system(config.db_system.clone())
            .with_datasource(config.datasource_name.clone());
        Self::new(
            recorder,
            CallSiteResolver::new(config.exclusion_list()),
            Arc::new(BacktraceInspector::new(config.max_stack_depth)),
        )
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Entry point for a data-access layer reporting one statement
    ///
    /// `batch_index` is the statement's position when it was part of a
    /// batch. Each call captures the stack; use [`Interceptor::observe`] to
    /// report a whole batch with a single capture.
    pub fn on_statement_executed(&self, raw_text: &str, elapsed_ms: u64, batch_index: Option<usize>) {
        let stack = self.inspector.capture_stack();
        let call_site = self.resolver.resolve(&stack);

        let event = ExecutedStatementEvent::new(raw_text, elapsed_ms, call_site);
        let event = match batch_index {
            Some(index) => event.in_batch(index),
            None => event,
        };
        self.recorder.record(&event);
    }

    /// Report one logical execution of one or more statements
    pub fn observe<S: AsRef<str>>(&self, statements: &[S], elapsed: Duration) {
        if statements.is_empty() {
            return;
        }
        let stack = self.inspector.capture_stack();
        self.observe_with_stack(statements, elapsed_millis(elapsed), &stack);
    }

    /// Report an execution whose stack was captured elsewhere
    ///
    /// All statements share the elapsed time and call site. Statements of a
    /// batch (more than one) are tagged with their index and recorded in
    /// order.
    pub fn observe_with_stack<S: AsRef<str>>(&self, statements: &[S], elapsed_ms: u64, stack: &[Frame]) {
        let call_site = self.resolver.resolve(stack);
        let batched = statements.len() > 1;

        trace!(
            statements = statements.len(),
            elapsed_ms,
            call_site = %location_of(call_site),
            "execution observed"
        );

        for (index, statement) in statements.iter().enumerate() {
            let event = ExecutedStatementEvent::new(statement.as_ref(), elapsed_ms, call_site);
            let event = if batched { event.in_batch(index) } else { event };
            self.recorder.record(&event);
        }
    }
}

/// The real statement-execution capability being instrumented
pub trait StatementExecutor {
    type Output;
    type Error;

    fn execute(&mut self, sql: &str) -> Result<Self::Output, Self::Error>;

    /// Execute several statements as one logical operation
    fn execute_batch(&mut self, statements: &[&str]) -> Result<Vec<Self::Output>, Self::Error> {
        statements.iter().map(|sql| self.execute(sql)).collect()
    }
}

/// Decorator reporting every execution of the inner executor
#[derive(Debug)]
pub struct InstrumentedExecutor<E> {
    inner: E,
    interceptor: Arc<Interceptor>,
}

impl<E> InstrumentedExecutor<E> {
    pub fn new(inner: E, interceptor: Arc<Interceptor>) -> Self {
        Self { inner, interceptor }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: StatementExecutor> StatementExecutor for InstrumentedExecutor<E> {
    type Output = E::Output;
    type Error = E::Error;

    fn execute(&mut self, sql: &str) -> Result<Self::Output, Self::Error> {
        let start = Instant::now();
        let result = self.inner.execute(sql);
        self.interceptor.observe(&[sql], start.elapsed());
        result
    }

    fn execute_batch(&mut self, statements: &[&str]) -> Result<Vec<Self::Output>, Self::Error> {
        let start = Instant::now();
        let result = self.inner.execute_batch(statements);
        self.interceptor.observe(statements, start.elapsed());
        result
    }
}

//! Stack capture for call-site attribution
//!
//! Walks the current thread's stack with the `backtrace` crate and turns each
//! demangled symbol into a [`Frame`]. Symbol names are split into a type (or
//! module) path and a method name:
//!
//! - `shop::orders::OrderService::create` -> (`shop::orders::OrderService`, `create`)
//! - `<shop::Pg as shop::Store>::save` -> (`shop::Pg`, `save`)
//! - `shop::run::{{closure}}` -> (`shop`, `run`)

use crate::call_site::Frame;

/// Maximum stack depth to capture (bounds per-execution overhead)
pub const MAX_STACK_DEPTH: usize = 64;

/// Source of the current execution's call stack, innermost frame first
pub trait StackInspector: Send + Sync {
    fn capture_stack(&self) -> Vec<Frame>;
}

/// Captures the native stack of the calling thread
#[derive(Debug, Clone)]
pub struct BacktraceInspector {
    max_depth: usize,
}

impl Default for BacktraceInspector {
    fn default() -> Self {
        Self::new(MAX_STACK_DEPTH)
    }
}

impl BacktraceInspector {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

impl StackInspector for BacktraceInspector {
    fn capture_stack(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(16);

        backtrace::trace(|raw| {
            // Inlined functions resolve to several symbols for one frame
            backtrace::resolve_frame(raw, |symbol| {
                if frames.len() >= self.max_depth {
                    return;
                }
                if let Some(name) = symbol.name() {
                    let demangled = format!("{:#}", name);
                    // Foreign symbols (libc, the unwinder) have no module path
                    if let Some(frame) = frame_from_symbol(&demangled, symbol.lineno())
                        .filter(|frame| !frame.type_name.is_empty())
                    {
                        frames.push(frame);
                    }
                }
            });
            frames.len() < self.max_depth
        });

        frames
    }
}

/// Returns a fixed stack on every capture
#[derive(Debug, Clone, Default)]
pub struct FixedStackInspector {
    frames: Vec<Frame>,
}

impl FixedStackInspector {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }
}

impl StackInspector for FixedStackInspector {
    fn capture_stack(&self) -> Vec<Frame> {
        self.frames.clone()
    }
}

/// Build a frame from a demangled symbol name (hash suffix already removed)
pub fn frame_from_symbol(symbol: &str, line: Option<u32>) -> Option<Frame> {
    let mut name = symbol.trim();
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    if name.is_empty() {
        return None;
    }

    let (path, method) = match split_last_segment(name) {
        Some((path, method)) => (qualified_self_type(path), method),
        None => ("", name),
    };

    Some(Frame::new(path, method, line.unwrap_or(0)))
}

/// Split at the last `::` that is not inside angle brackets
fn split_last_segment(name: &str) -> Option<(&str, &str)> {
    let bytes = name.as_bytes();
    let mut depth = 0i32;
    let mut idx = bytes.len();

    while idx >= 2 {
        idx -= 1;
        match bytes[idx] {
            b'>' => depth += 1,
            b'<' => depth -= 1,
            b':' if depth == 0 && bytes[idx - 1] == b':' => {
                return Some((&name[..idx - 1], &name[idx + 1..]));
            }
            _ => {}
        }
    }
    None
}

/// `<Type as Trait>` -> `Type`, `<Type>` -> `Type`, anything else unchanged
fn qualified_self_type(path: &str) -> &str {
    match path.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
        Some(inner) => inner.split(" as ").next().unwrap_or(inner).trim(),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_plain_method() {
        let frame = frame_from_symbol("shop::orders::OrderService::create", Some(42)).unwrap();
        assert_eq!(frame.type_name, "shop::orders::OrderService");
        assert_eq!(frame.method_name, "create");
        assert_eq!(frame.line_number, 42);
    }

    #[test]
    fn test_frame_from_trait_impl() {
        let frame = frame_from_symbol(
            "<querylens::interceptor::InstrumentedExecutor<E> as querylens::interceptor::StatementExecutor>::execute",
            None,
        )
        .unwrap();
        assert_eq!(frame.type_name, "querylens::interceptor::InstrumentedExecutor<E>");
        assert_eq!(frame.method_name, "execute");
        assert_eq!(frame.line_number, 0);
    }

    #[test]
    fn test_frame_from_inherent_generic_impl() {
        let frame = frame_from_symbol("<shop::Repo<T>>::save", Some(3)).unwrap();
        assert_eq!(frame.type_name, "shop::Repo<T>");
        assert_eq!(frame.method_name, "save");
    }

    #[test]
    fn test_frame_from_closure() {
        let frame = frame_from_symbol("shop::jobs::run::{{closure}}::{{closure}}", Some(8)).unwrap();
        assert_eq!(frame.type_name, "shop::jobs");
        assert_eq!(frame.method_name, "run");
    }

    #[test]
    fn test_frame_from_bare_symbol() {
        let frame = frame_from_symbol("__libc_start_main", None).unwrap();
        assert_eq!(frame.type_name, "");
        assert_eq!(frame.method_name, "__libc_start_main");
    }

    #[test]
    fn test_frame_from_empty_symbol() {
        assert!(frame_from_symbol("", None).is_none());
        assert!(frame_from_symbol("{{closure}}", None).is_some());
    }

    #[test]
    fn test_generic_path_segment_not_split() {
        let frame =
            frame_from_symbol("shop::Cache<alloc::string::String>::get", Some(1)).unwrap();
        assert_eq!(frame.type_name, "shop::Cache<alloc::string::String>");
        assert_eq!(frame.method_name, "get");
    }

    #[test]
    fn test_fixed_inspector_returns_frames() {
        let frames = vec![Frame::new("a::B", "c", 1)];
        let inspector = FixedStackInspector::new(frames.clone());
        assert_eq!(inspector.capture_stack(), frames);
        assert_eq!(inspector.capture_stack(), frames);
    }

    #[test]
    fn test_backtrace_inspector_respects_depth() {
        let inspector = BacktraceInspector::new(2);
        assert!(inspector.capture_stack().len() <= 2);
    }

    #[test]
    fn test_backtrace_inspector_zero_depth_clamped() {
        assert_eq!(BacktraceInspector::new(0).max_depth(), 1);
        assert_eq!(BacktraceInspector::default().max_depth(), MAX_STACK_DEPTH);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)] // Testing constant invariants
    fn test_max_stack_depth_constant() {
        assert_eq!(MAX_STACK_DEPTH, 64);
        assert!(MAX_STACK_DEPTH < 1000);
    }
}

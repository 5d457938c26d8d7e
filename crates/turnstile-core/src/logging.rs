//! Logging facilities for Turnstile.
//!
//! Turnstile uses the `tracing` crate for instrumentation. The library never
//! installs a subscriber; applications (and tests) install their own:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```

/// Target names for log filtering.
///
/// Every tracing call site in this crate routes through these constants, so
/// they are both the filter directives and the single source of truth for
/// the target strings.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "turnstile_core";
    /// Executor queue/poll/cancel operations.
    pub const EXECUTOR: &str = "turnstile_core::executor";
    /// The worker thread's iteration loop.
    pub const WORKER: &str = "turnstile_core::worker";
    /// Token generation.
    pub const TOKEN: &str = "turnstile_core::token";
    /// Performance spans emitted by [`PerfSpan`](super::PerfSpan).
    pub const PERF: &str = "turnstile_core::perf";
}

/// A guard that emits a tracing span when dropped.
///
/// This is useful for tracking the duration of operations, such as a single
/// worker iteration.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

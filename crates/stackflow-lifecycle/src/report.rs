//! Operator-facing progress reporting
//!
//! Engines receive a reporter handle instead of printing through a global
//! logger, so a caller can silence one phase without touching the rest.

/// Sink for progress messages meant for the operator
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    fn success(&self, message: &str);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn info(&self, _message: &str) {}

    fn warn(&self, _message: &str) {}

    fn success(&self, _message: &str) {}
}

/// Forwards messages to `tracing`, for non-interactive callers
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn success(&self, message: &str) {
        tracing::info!(outcome = "success", "{}", message);
    }
}

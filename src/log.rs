//! Operator-facing log sink.
//!
//! The slicing engine reports progress and its final summary through the
//! [`Logger`] trait instead of writing to a global logger directly, so callers
//! can route the messages wherever they need and tests can capture them.
//!
//! ```
//! use table_slicer::log::{Logger, MemoryLogger};
//!
//! let logger = MemoryLogger::default();
//! logger.info("Sliced 3 rows.");
//! assert_eq!(logger.lines(), vec!["INFO  Sliced 3 rows.".to_string()]);
//! ```

use parking_lot::Mutex;
use std::sync::Arc;

/// Sink for operator-facing messages.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn info(&self, message: &str) {
        (**self).info(message);
    }

    fn warn(&self, message: &str) {
        (**self).warn(message);
    }
}

/// Forwards messages to the `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Captures messages in memory, prefixed with their level.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogger {
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns the captured lines and clears the buffer.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl Logger for MemoryLogger {
    fn info(&self, message: &str) {
        self.lines.lock().push(format!("INFO  {message}"));
    }

    fn warn(&self, message: &str) {
        self.lines.lock().push(format!("WARN  {message}"));
    }
}

//! Injected error-sink capability.
//!
//! Transport and decompression failures are reported through this seam so
//! hosts can persist them however they like. The default routes to the
//! `tracing` subscriber.

use tracing::error;

/// Receives structured error records from the engine.
pub trait ErrorSink: Send + Sync {
    fn record(&self, subject: &str, detail: &str);
}

/// Default [`ErrorSink`] forwarding to `tracing::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn record(&self, subject: &str, detail: &str) {
        error!(subject, detail, "resource error");
    }
}

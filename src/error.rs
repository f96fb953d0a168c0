//! Fatal error kinds raised by the stratification pipeline.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! variants mark the failures callers are expected to tell apart.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StratifyError {
    /// Missing input columns, invalid labels or an inconsistent category
    /// configuration. Raised before any rows are processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The bulk similarity service or the fingerprint comparison failed for
    /// one metric. There is no partial-metric fallback.
    #[error("similarity computation failed for metric {metric}: {message}")]
    UpstreamComputation { metric: String, message: String },
}

impl StratifyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        StratifyError::Configuration(message.into())
    }

    pub fn upstream(metric: impl Into<String>, message: impl Into<String>) -> Self {
        StratifyError::UpstreamComputation {
            metric: metric.into(),
            message: message.into(),
        }
    }
}

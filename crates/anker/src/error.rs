//! Error types for the header location engine.
//!
//! Only precondition failures surface as `Err`: an empty line stream, or a
//! strict-mode oracle response without a usable outline. Everything else is
//! recovered locally and reported through `LocateResult::mode` and
//! `LocateResult::messages`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnkerError>;

/// Engine error kinds.
#[derive(Debug, Error)]
pub enum AnkerError {
    /// The input line stream was empty after blank filtering.
    #[error("no usable lines in input")]
    NoLines,

    /// The oracle response lacked a valid fenced JSON outline (strict mode).
    #[error("outline parse failed ({code})")]
    OutlineParse {
        /// Machine-readable failure code, e.g. `empty_outline`.
        code: &'static str,
    },

    /// The oracle transport failed (timeout, 4xx, 5xx).
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// The embedding provider failed; callers fall back to lexical scoring.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// An artifact cache write failed; the result is still returned.
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// The caller cancelled the run between phases; no partial outline is
    /// ever returned.
    #[error("run cancelled")]
    Cancelled,

    /// Underlying I/O failure (trace or cache files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnkerError {
    /// Strict-mode outline parse failure with the canonical code.
    pub fn empty_outline() -> Self {
        AnkerError::OutlineParse {
            code: "empty_outline",
        }
    }

    /// Oracle transport failure.
    pub fn oracle(msg: impl Into<String>) -> Self {
        AnkerError::OracleUnavailable(msg.into())
    }

    /// Embedding provider failure.
    pub fn embedder(msg: impl Into<String>) -> Self {
        AnkerError::EmbedderUnavailable(msg.into())
    }

    /// Cache write failure.
    pub fn cache_write(msg: impl Into<String>) -> Self {
        AnkerError::CacheWrite(msg.into())
    }

    /// True when the engine recovers from this error without surfacing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnkerError::OracleUnavailable(_) | AnkerError::EmbedderUnavailable(_) | AnkerError::CacheWrite(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_errors_are_not_recoverable() {
        assert!(!AnkerError::NoLines.is_recoverable());
        assert!(!AnkerError::empty_outline().is_recoverable());
    }

    #[test]
    fn test_transport_errors_are_recoverable() {
        assert!(AnkerError::oracle("timeout").is_recoverable());
        assert!(AnkerError::embedder("500").is_recoverable());
        assert!(AnkerError::cache_write("disk full").is_recoverable());
    }

    #[test]
    fn test_outline_parse_code_in_display() {
        let err = AnkerError::empty_outline();
        assert!(err.to_string().contains("empty_outline"));
    }
}

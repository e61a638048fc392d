//! Error types for the retrieval engine.
//!
//! Per-document failures during builds and per-candidate failures during
//! scoring are recovered locally by the orchestrator (counted and logged);
//! every variant here is surfaced to the caller.

use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid input: empty query, out-of-range `k`, unknown filter field,
    /// or a configuration/dimension mismatch.
    #[error("validation error: {0}")]
    Validation(String),

    /// The embedder failed or returned a malformed matrix.
    #[error("embedding failure: {0}")]
    Embedding(String),

    /// A query arrived before any build or load completed.
    #[error("index is not ready: no build or load has completed")]
    IndexNotReady,

    /// Snapshot read/write failed. Live state is unchanged.
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot failed integrity or format verification and was discarded.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// The query's cancellation signal fired.
    #[error("query cancelled")]
    Cancelled,

    /// The query exceeded its deadline.
    #[error("query deadline exceeded")]
    Timeout,

    /// An invariant violation. Carries the generation so an operator can
    /// trigger a rebuild of the offending index state.
    #[error("internal error (generation {generation}): {message}")]
    Internal { generation: u64, message: String },
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = EngineError::Validation("k out of range".into());
        assert!(e.to_string().contains("k out of range"));

        let e = EngineError::Internal {
            generation: 7,
            message: "length mismatch".into(),
        };
        assert!(e.to_string().contains("generation 7"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: EngineError = io.into();
        assert!(matches!(e, EngineError::Io(_)));
    }
}

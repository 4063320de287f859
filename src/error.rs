//! Error types for trellis.

use thiserror::Error;

/// Result type for trellis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for trellis operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Gold structure is not reachable by any action sequence the
    /// transition system can express (e.g. non-projective arcs).
    ///
    /// Training callers skip the offending example; this is never a
    /// batch-fatal condition.
    #[error("Oracle cannot reach gold structure: {0}")]
    Oracle(String),

    /// Invariant breach in the parse state machine. The transition system
    /// guarantees at least one legal action for any non-final state;
    /// seeing none means search results would be corrupt, so this is
    /// surfaced to the operator rather than recovered.
    #[error("Parse state invariant breach: {0}")]
    State(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (bad scalar values, malformed blob).
    #[error("Config error: {0}")]
    Config(String),

    /// Search aborted by the cooperative stop flag.
    #[error("Search interrupted")]
    Interrupted,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an oracle-unreachable error.
    pub fn oracle(msg: impl Into<String>) -> Self {
        Error::Oracle(msg.into())
    }

    /// Create a parse-state invariant error.
    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::oracle("non-projective arc (3, 1)");
        assert!(e.to_string().contains("non-projective"));
        let e = Error::state("no legal action at step 4");
        assert!(e.to_string().contains("invariant"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}

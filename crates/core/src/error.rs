//! Error types for the turnledger domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum, folded into [`Error`].

use thiserror::Error;

/// The top-level error type for all turnledger operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Ledger errors ---
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Filesystem ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Contract violations reported by [`crate::ledger::Ledger`].
///
/// Every variant leaves the ledger exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Invalid ledger configuration: {0}")]
    InvalidConfig(String),

    #[error("Assistant reply has no pending user message to pair with")]
    DanglingTurn,

    #[error("User message must not be empty")]
    EmptyInput,

    #[error("A user message is already waiting for its reply")]
    PendingTurn,

    #[error("Unknown message role: {0}")]
    UnknownRole(String),

    #[error("Corrupt transcript: {0}")]
    CorruptTranscript(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn ledger_error_converts_into_top_level() {
        let err: Error = LedgerError::DanglingTurn.into();
        assert!(matches!(err, Error::Ledger(LedgerError::DanglingTurn)));
        assert!(err.to_string().contains("pending user message"));
    }

    #[test]
    fn unknown_role_names_the_role() {
        let err = LedgerError::UnknownRole("tool".into());
        assert_eq!(err.to_string(), "Unknown message role: tool");
    }
}

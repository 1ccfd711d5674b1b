// ── BIEM Atoms: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Validation…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `code()` returns a stable, language-neutral string for each error kind
//     so API callers can branch without parsing messages.
//   • No variant carries secret material (API keys, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Embedding or LLM provider failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A bounded deadline elapsed before the external call completed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Input rejected before any side effect (empty content, bad delta, …).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A backend is marked unavailable; dependent operations cannot proceed.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl MemoryError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Stable code identifying the error kind at the API boundary.
    ///
    /// External transient failures are retried inside the engine and only
    /// surface with these codes once the retry budget is exhausted.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Io(_)
            | MemoryError::Network(_)
            | MemoryError::Database(_)
            | MemoryError::Provider { .. }
            | MemoryError::Timeout(_) => "external_transient",
            MemoryError::Unavailable(_) => "external_permanent",
            MemoryError::Validation(_) => "validation",
            MemoryError::Serialization(_) | MemoryError::Other(_) => "internal",
        }
    }
}

// ── Migration bridge: String → MemoryError ─────────────────────────────────
// Allows `?` on helpers that return `Result<T, String>` inside functions
// returning `MemoryResult<T>`.

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        MemoryError::Other(s)
    }
}

impl From<&str> for MemoryError {
    fn from(s: &str) -> Self {
        MemoryError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type MemoryResult<T> = Result<T, MemoryError>;

//! Error taxonomy shared by the NyumbaPay core crates.
//!
//! Each crate surfaces its own `thiserror` enum; every variant maps into one
//! of these kinds and carries a stable snake_case code. API layers outside
//! the core translate `(kind, code)` into transport-level errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a core error, independent of which crate raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input: negative amounts, oversized descriptors,
    /// unbalanced journals, currency mismatches.
    Validation,
    /// Referenced entity does not exist.
    NotFound,
    /// Operation is not legal in the aggregate's current state.
    State,
    /// Optimistic-lock retries exhausted.
    Concurrency,
    /// A payment/payout provider returned an error or timed out.
    Provider,
    /// Stored data violates a ledger invariant. Never auto-healed.
    Integrity,
    /// Operation not implemented by the chosen provider.
    Unsupported,
    /// Storage or serialisation failure inside the core.
    Internal,
}

impl ErrorKind {
    /// Whether callers may retry the operation verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Concurrency | ErrorKind::Provider)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::State => "state",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Provider => "provider",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Implemented by every core error enum.
pub trait CoreError: std::error::Error {
    /// Taxonomy kind for this error.
    fn kind(&self) -> ErrorKind;

    /// Stable machine-readable code, e.g. `unbalanced_journal`.
    fn code(&self) -> &'static str;
}

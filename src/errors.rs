//! Error taxonomy for the bot core.
//!
//! Four classes, each with a distinct recovery policy:
//!
//! - [`BotError::InvalidInput`] — malformed user input (bad answer count,
//!   bad partner type code). Recovered inside the router as a re-prompt in
//!   the same state, never surfaced as a system error.
//! - [`BotError::NotFound`] — a non-creating lookup missed (e.g. unsubscribe
//!   with no billing record). Surfaced as a "no record found" message.
//! - [`BotError::ExternalService`] — a collaborator call failed (OpenAI,
//!   Stripe, LINE, TinyURL). Recovered at the call site with a fixed
//!   apology message; the interaction loop continues.
//! - [`BotError::Persistence`] — SQLite unavailable. The one class that
//!   aborts the request with a 500 at the HTTP boundary.

use thiserror::Error;

/// Unified error type for the diagnosis/advice core.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed user-supplied input; turned into a re-prompt.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup on a non-creating path found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external collaborator (LLM, payment, transport) failed.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// The local store failed; no safe degraded behavior exists.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl BotError {
    /// Shorthand for an [`BotError::ExternalService`] with a formatted cause.
    pub fn external(context: &str, cause: impl std::fmt::Display) -> Self {
        Self::ExternalService(format!("{}: {}", context, cause))
    }
}

pub type BotResult<T> = Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_formats_context_and_cause() {
        let err = BotError::external("stripe checkout", "timed out");
        assert_eq!(
            err.to_string(),
            "external service error: stripe checkout: timed out"
        );
    }

    #[test]
    fn test_persistence_from_rusqlite() {
        let sqlite_err = rusqlite::Error::QueryReturnedNoRows;
        let err: BotError = sqlite_err.into();
        assert!(matches!(err, BotError::Persistence(_)));
    }
}

// flightrec-core/src/error.rs
// ============================================================================
// Module: Core Error Taxonomy
// Description: Abstract error kinds shared by the repository, evaluator, and
//              guardrail components.
// Purpose: Give every caller a stable, typed failure surface independent of
//          the storage backend or judge transport in use.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! `CoreError` is the one error type every public operation in this crate
//! returns. Storage-layer failures (foreign-key violations, uniqueness
//! violations) are translated into [`CoreError::InvalidInput`] or
//! [`CoreError::InvalidState`] before crossing the repository trait
//! boundary; judge-transport failures are translated into
//! [`CoreError::Network`], [`CoreError::Auth`], [`CoreError::RateLimit`], or
//! [`CoreError::Server`].

use thiserror::Error;

/// Errors surfaced by the trace engine's public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The referenced trace, step, or policy does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A required field was missing, malformed, or failed an enumeration
    /// check.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The operation is not valid given the entity's current state (for
    /// example, appending to a non-running trace).
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A judge response could not be parsed as JSON.
    #[error("parse error: {0}")]
    Parse(String),
    /// The judge transport could not be reached.
    #[error("network error: {0}")]
    Network(String),
    /// The judge transport rejected the credential.
    #[error("auth error: {0}")]
    Auth(String),
    /// The judge transport rate-limited the request.
    #[error("rate limited: {0}")]
    RateLimit(String),
    /// The judge transport reported a server-side failure.
    #[error("server error: {0}")]
    Server(String),
}

// flightrec-core/src/ids.rs
// ============================================================================
// Module: Trace Engine Identifiers
// Description: Opaque, prefixed string identifiers for every stored entity.
// Purpose: Provide strongly typed, serializable IDs with stable string forms
//          and a collision-resistant minting routine per entity kind.
// Dependencies: serde, crate::mint
// ============================================================================

//! ## Overview
//! Identifiers are opaque and serialize as strings. Each kind mints via
//! [`crate::mint::new_id`] with a fixed short prefix; validation beyond
//! "well-formed opaque string" is not performed here.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::mint::new_id;

/// Declares a newtype identifier with the standard string-wrapper API.
macro_rules! opaque_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh, collision-resistant identifier.
            #[must_use]
            pub fn mint() -> Self {
                Self(new_id($prefix))
            }

            /// Wraps an existing identifier string without minting.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(TraceId, "trc", "Opaque identifier for a recorded trace.");
opaque_id!(StepId, "stp", "Opaque identifier for a trace step.");
opaque_id!(SnapshotId, "snp", "Opaque identifier for a step snapshot.");
opaque_id!(EvalId, "evl", "Opaque identifier for an evaluation verdict.");
opaque_id!(PolicyId, "pol", "Opaque identifier for a guardrail policy.");

#[cfg(test)]
mod tests {
    use super::TraceId;

    #[test]
    fn mint_uses_the_expected_prefix() {
        let id = TraceId::mint();
        assert!(id.as_str().starts_with("trc_"));
        assert_eq!(id.as_str().len(), "trc_".len() + 12);
    }

    #[test]
    fn mint_is_not_constant() {
        assert_ne!(TraceId::mint(), TraceId::mint());
    }
}

// flightrec-core/src/mint.rs
// ============================================================================
// Module: Identifier Mint
// Description: Random opaque ID generation shared by every identifier kind.
// Purpose: Produce `prefix_<random>` identifiers with a collision space well
//          under the 1e-6-over-1e6 bound.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! IDs are `prefix + '_' + 12 random alphanumeric characters`. Sampling from
//! `rand::distributions::Alphanumeric` over 12 characters gives a collision
//! space of 62^12, far exceeding the required bound across 1e6 IDs.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::thread_rng;

/// Length of the random suffix, in characters.
const SUFFIX_LEN: usize = 12;

/// Mints a new opaque identifier with the given short prefix.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    let suffix: String =
        thread_rng().sample_iter(Alphanumeric).take(SUFFIX_LEN).map(char::from).collect();
    format!("{prefix}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::SUFFIX_LEN;
    use super::new_id;

    #[test]
    fn new_id_has_prefix_and_expected_length() {
        let id = new_id("trc");
        assert!(id.starts_with("trc_"));
        assert_eq!(id.len(), "trc_".len() + SUFFIX_LEN);
    }

    #[test]
    fn new_id_is_alphanumeric_after_prefix() {
        let id = new_id("stp");
        let suffix = &id["stp_".len()..];
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

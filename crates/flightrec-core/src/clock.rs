// flightrec-core/src/clock.rs
// ============================================================================
// Module: Clock
// Description: Wall-clock timestamp formatting for newly created rows.
// Purpose: Produce the ISO-8601 strings every persisted timestamp column
//          uses, in one place.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Every "defaults to now" field in the ingest/append/fork/create paths goes
//! through [`now_iso8601`]. Lexicographic ordering of the produced strings
//! matches chronological ordering, per the persisted-timestamp contract.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Returns the current wall-clock time as an RFC 3339 / ISO-8601 string.
#[must_use]
pub fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

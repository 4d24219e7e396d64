// flightrec-store-sqlite/src/lib.rs
// ============================================================================
// Crate: flightrec-store-sqlite
// Description: Durable SQLite-backed implementation of the trace repository
//              and policy repository traits.
// Purpose: Own the on-disk schema, connection lifecycle, and SQL translation
//          of every flightrec-core repository operation.
// Dependencies: flightrec-core, rusqlite, serde_json, thiserror
// ============================================================================

//! # flightrec-store-sqlite
//!
//! A single-file-per-database `SQLite` store implementing
//! [`flightrec_core::TraceRepository`] and [`flightrec_core::PolicyRepository`].
//! Every multi-row write runs inside one transaction via [`Store::do_tx`];
//! WAL journaling lets readers proceed without blocking on that writer.

mod repository;
mod store;

pub use store::SqliteStoreError;
pub use store::Store;

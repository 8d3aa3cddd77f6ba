#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

//! Shared test scaffolding: on-disk package fixtures, a docker probe for
//! Postgres-backed tests, and an in-memory [`MemStore`] implementing every
//! store contract.

/// Docker availability probes for container-backed tests.
pub mod docker;
/// On-disk package and torrent fixtures.
pub mod fixtures;
/// In-memory store used by subsystem unit tests.
pub mod memstore;

pub use memstore::MemStore;

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

//! Postgres-backed metadata store.
//!
//! One [`MetaStore`] implements every store contract from
//! `reelgrid-torrent-core::store`; migrations are embedded and applied at
//! construction.

mod fleet;
mod generation;
mod store;
mod torrents;
mod transfers;

pub use store::MetaStore;

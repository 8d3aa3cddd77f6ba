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

//! Private HTTP BitTorrent tracker for the fleet.
//!
//! One announce endpoint, no scrape, no DHT. Swarms live in memory; the
//! append-only audit log is best-effort. Loopback announcers are rewritten to
//! the configured public address so the main node can seed from the tracker
//! host without advertising `127.0.0.1`.

mod announce;
mod server;
mod swarm;

pub use announce::AnnounceRequest;
pub use server::{TrackerServer, router};
pub use swarm::{AnnounceOutcome, PeerEntry, SwarmSnapshot, Tracker, TrackerSnapshot};

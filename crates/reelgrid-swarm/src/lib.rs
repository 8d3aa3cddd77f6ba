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

//! Per-node swarm client.
//!
//! Owns the engine session, the `ActiveTorrent` map, disk verification,
//! throughput measurement, and the disk-error policy. The engine data plane
//! sits behind [`SwarmSession`]; [`DiskSession`] is the in-tree
//! implementation that verifies pieces straight off the filesystem.

mod client;
mod diskerr;
mod monitor;
mod session;
mod sinks;
mod stats;
mod storage;

pub use client::{ActiveTorrentView, SwarmClient, SwarmClientConfig, SwarmClientDeps};
pub use diskerr::{DiskErrorKind, classify_write_error};
pub use monitor::{spawn_download_monitor, spawn_integrity_watcher, spawn_seeder_maintenance};
pub use session::{DiskSession, SessionStats, SessionTorrent, SwarmSession};
pub use sinks::{NullSink, ProgressSink, TransferErrorReporter};
pub use stats::TorrentStats;
pub use storage::StorageLayout;

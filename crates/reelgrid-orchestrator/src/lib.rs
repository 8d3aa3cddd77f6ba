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

//! Transfer orchestration.
//!
//! Two halves: the main node (dispatcher, progress sink, report ingest,
//! command queues, served over the control API) and client nodes (pending
//! transfer poller, command poller, status reporter). Both halves run the
//! ensure-seeding restorer and the seeder-row syncer.

mod api;
mod commands;
mod control_api;
mod reporter;
mod restore;
mod service;
mod sinks;
mod transfers;

pub use api::{HttpMainApi, MainApi};
pub use commands::CommandPoller;
pub use control_api::control_router;
pub use reporter::{HttpReportSink, ReportSink, StatusReporter, classify_torrent};
pub use restore::{ensure_seeding_once, spawn_ensure_seeding, spawn_seeder_sync};
pub use service::MainService;
pub use sinks::{ClientSink, MainSink};
pub use transfers::TransferPoller;

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

//! Shared domain types and store contracts for the distribution core.
//!
//! Every subsystem (generator, swarm client, tracker, queue, orchestrator)
//! speaks these types; the metadata store implements the traits in
//! [`store`]. Keeping the contracts here lets subsystem crates run their
//! tests against in-memory stand-ins the same way the engine adapter is
//! tested against a stub session.

mod model;
mod report;
/// Store contracts implemented by the metadata store.
pub mod store;

pub use model::{
    GenerationProgress, InfoHash, InfoHashError, PIECE_LENGTH_LARGE, PIECE_LENGTH_SMALL,
    PIECE_LENGTH_THRESHOLD, Package, PeerId, PieceCheckpoint, QueueItem, QueueStatus,
    SeedableTorrent, ServerMode, ServerRow, Transfer, TransferStatus, TorrentRecord,
    piece_length_for_total,
};
pub use report::{
    CommandAck, CommandResult, ContentCommand, ContentCommandAction, PendingTransfer,
    QueueCheck, QueueStatusEntry, SeederRegistration, TorrentStatusEntry, TorrentStatusReport,
    TransferCommand, TransferCommandAction, TransferProgressUpdate,
};

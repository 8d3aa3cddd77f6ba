//! Async contracts the metadata store implements for each subsystem.
//!
//! Methods return `anyhow::Result` like the engine traits do; callers add
//! their own context. In-memory implementations back the subsystem unit
//! tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    GenerationProgress, InfoHash, PieceCheckpoint, QueueItem, SeedableTorrent, ServerRow,
    TorrentRecord, Transfer, TransferStatus,
};
use crate::report::{
    CommandAck, ContentCommand, PendingTransfer, QueueStatusEntry, TorrentStatusReport,
    TransferCommand, TransferProgressUpdate,
};

/// Checkpoint persistence used by the generator for crash-safe resume.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load every checkpoint row for `(package, node)`, any order.
    async fn load_checkpoints(
        &self,
        package_id: Uuid,
        server_id: Uuid,
    ) -> Result<Vec<PieceCheckpoint>>;

    /// Flush one batch transactionally with upsert semantics on
    /// `(package, node, index)`.
    async fn save_checkpoint_batch(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        batch: &[PieceCheckpoint],
    ) -> Result<()>;

    /// Delete all checkpoint rows for `(package, node)` after success.
    async fn clear_checkpoints(&self, package_id: Uuid, server_id: Uuid) -> Result<()>;
}

/// Queue-row access the generator needs while hashing runs.
#[async_trait]
pub trait GenerationStatusStore: Send + Sync {
    /// Refresh `{progress_percent, current_file, hashing_speed_bps}`.
    async fn update_generation_progress(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        progress: &GenerationProgress,
    ) -> Result<()>;

    /// Read the cooperative cancellation flag from the queue row.
    async fn generation_cancelled(&self, package_id: Uuid, server_id: Uuid) -> Result<bool>;
}

/// Piece-completion cache shared fleet-wide by info-hash.
///
/// Missing rows mean "re-verify from disk"; any node computing a correct
/// `true` may upsert it.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Fetch one piece's verification state; `None` means unknown.
    async fn piece_complete(&self, info_hash: &InfoHash, piece_index: u32)
    -> Result<Option<bool>>;

    /// Fetch every known `(piece index, completed)` pair for an info-hash.
    async fn known_pieces(&self, info_hash: &InfoHash) -> Result<Vec<(u32, bool)>>;

    /// Record one piece's verification state.
    async fn set_piece_complete(
        &self,
        info_hash: &InfoHash,
        piece_index: u32,
        complete: bool,
    ) -> Result<()>;

    /// Pre-mark every piece verified after a successful generation.
    async fn mark_all_complete(&self, info_hash: &InfoHash, piece_count: u32) -> Result<()>;

    /// Drop all rows for an info-hash (integrity reset, cancel with delete).
    async fn clear_pieces(&self, info_hash: &InfoHash) -> Result<()>;

    /// Delete `completed = false` rows left behind by a dead process.
    async fn purge_incomplete_rows(&self) -> Result<u64>;
}

/// Torrent rows plus the per-node package inventory.
#[async_trait]
pub trait TorrentStore: Send + Sync {
    /// Upsert a package row keyed by asset-map UUID.
    async fn upsert_package(&self, package: &crate::model::Package) -> Result<()>;

    /// Persist a freshly generated torrent; idempotent via info-hash.
    async fn save_torrent(&self, record: &TorrentRecord) -> Result<Uuid>;

    /// Look up a torrent row by swarm identifier.
    async fn torrent_by_info_hash(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>>;

    /// Look up a torrent row by primary key.
    async fn torrent_by_id(&self, torrent_id: Uuid) -> Result<Option<TorrentRecord>>;

    /// Look up the torrent row for a package, if one exists.
    async fn torrent_for_package(&self, package_id: Uuid) -> Result<Option<TorrentRecord>>;

    /// Join torrent rows with this node's inventory for startup seeding.
    async fn seedable_torrents(&self, server_id: Uuid) -> Result<Vec<SeedableTorrent>>;

    /// Record that a package now exists at `local_path` on `server_id`.
    async fn upsert_inventory(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()>;

    /// Remove the inventory row after a content delete.
    async fn remove_inventory(&self, package_id: Uuid, server_id: Uuid) -> Result<()>;

    /// Inventory path for `(package, node)` when known.
    async fn inventory_path(&self, package_id: Uuid, server_id: Uuid) -> Result<Option<String>>;
}

/// Queue rows and the fleet-coordination recovery operations.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a queue row with `ON CONFLICT (package, node) DO NOTHING`.
    async fn enqueue(&self, package_id: Uuid, server_id: Uuid) -> Result<bool>;

    /// Oldest `queued` row for this node whose package has an inventory row.
    async fn next_queued(&self, server_id: Uuid) -> Result<Option<QueueItem>>;

    /// Whether any *other* node holds a `generating` row for the package.
    async fn other_node_generating(&self, package_id: Uuid, server_id: Uuid) -> Result<bool>;

    /// Transition a row to `generating`.
    async fn mark_generating(&self, queue_id: Uuid) -> Result<()>;

    /// Terminal transition with optional categorised message.
    async fn finish(
        &self,
        queue_id: Uuid,
        status: crate::model::QueueStatus,
        message: Option<&str>,
    ) -> Result<()>;

    /// Delete a queue row (used when main reports the torrent already exists).
    async fn delete_item(&self, queue_id: Uuid) -> Result<()>;

    /// Flip the cooperative cancellation flag.
    async fn request_cancel(&self, queue_id: Uuid) -> Result<()>;

    /// Startup: delete every `completed` row fleet-wide.
    async fn delete_completed_rows(&self) -> Result<u64>;

    /// Startup: reset this node's `generating` and `failed` rows to `queued`.
    async fn reset_own_rows(&self, server_id: Uuid) -> Result<u64>;

    /// Startup: de-duplicate foreign `generating` rows per package and
    /// reclaim them by switching ownership to this node as `queued`.
    async fn reclaim_orphaned_rows(&self, server_id: Uuid) -> Result<u64>;

    /// Active (`queued` / `generating`) items for the status report.
    async fn active_entries(&self, server_id: Uuid) -> Result<Vec<QueueStatusEntry>>;
}

/// Transfer rows: dispatch on main, progress on the destination.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Create a transfer row (exercised by main-node tests and tooling).
    async fn create_transfer(
        &self,
        torrent_id: Uuid,
        destination_server_id: Uuid,
        requested_by: Option<&str>,
    ) -> Result<Uuid>;

    /// Queued transfers for a destination node, priority order.
    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>>;

    /// Fetch one transfer row.
    async fn transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>>;

    /// Apply a destination-owned progress patch.
    async fn apply_transfer_update(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()>;

    /// Main-owned status transition (assignment, cancellation).
    async fn set_transfer_status(
        &self,
        transfer_id: Uuid,
        status: TransferStatus,
    ) -> Result<()>;

    /// Transfers in `downloading` targeting this node, for restart resume.
    async fn downloading_transfers(&self, server_id: Uuid) -> Result<Vec<Transfer>>;
}

/// Seeder registrations with liveness timestamps.
#[async_trait]
pub trait SeederStore: Send + Sync {
    /// Upsert a `(torrent, node, local path)` registration with
    /// `last_announce = now`.
    async fn upsert_seeder(
        &self,
        torrent_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()>;

    /// Remove a registration after stop or delete.
    async fn remove_seeder(&self, torrent_id: Uuid, server_id: Uuid) -> Result<()>;

    /// Live seeder count for a torrent (rows younger than the staleness cap).
    async fn seeder_count(&self, torrent_id: Uuid) -> Result<i64>;
}

/// Node registry plus per-(node, torrent) status and ingestion tracking.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Self-register or refresh this node's row.
    async fn upsert_server(&self, row: &ServerRow) -> Result<()>;

    /// Fetch a node row.
    async fn server(&self, server_id: Uuid) -> Result<Option<ServerRow>>;

    /// Record a seeding-restore failure keyed by `(node, torrent)`.
    async fn record_server_torrent_status(
        &self,
        server_id: Uuid,
        torrent_id: Uuid,
        status: &str,
        message: Option<&str>,
    ) -> Result<()>;

    /// Insert the ingestion tracking row consumed by the external detector.
    async fn create_ingestion_tracking(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()>;

    /// Persist an ingested status report (reconciles when `is_full_sync`).
    async fn ingest_status_report(&self, report: &TorrentStatusReport) -> Result<()>;
}

/// Command queues owned by the main node.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Queue a transfer command for a destination node.
    async fn queue_transfer_command(
        &self,
        server_id: Uuid,
        command: &TransferCommand,
    ) -> Result<()>;

    /// Queue a content command for a destination node.
    async fn queue_content_command(
        &self,
        server_id: Uuid,
        command: &ContentCommand,
    ) -> Result<()>;

    /// Unacknowledged transfer commands for a node.
    async fn pending_transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>>;

    /// Unacknowledged content commands for a node.
    async fn pending_content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>>;

    /// Acknowledge a transfer command.
    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()>;

    /// Acknowledge a content command.
    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()>;
}

/// Append-only audit log of tracker hits.
#[async_trait]
pub trait AnnounceLog: Send + Sync {
    /// Record one announce attempt; implementations swallow their own
    /// failures so an unreachable store never breaks the announce path.
    async fn record_announce(&self, attempt: &AnnounceAttempt) -> Result<()>;
}

/// One tracker hit, successful or rejected.
#[derive(Debug, Clone)]
pub struct AnnounceAttempt {
    /// Hex info-hash when the request carried a valid one.
    pub info_hash: Option<String>,
    /// Peer identifier as sent.
    pub peer_id: Option<String>,
    /// Source IP after the forwarded-header rules.
    pub source_ip: String,
    /// Announced port.
    pub port: Option<u16>,
    /// Event parameter (`started`, `stopped`, `completed`, or empty).
    pub event: String,
    /// Whether the announce was accepted.
    pub accepted: bool,
    /// Failure reason returned to the peer, if any.
    pub failure_reason: Option<String>,
    /// Server-side receive time.
    pub received_at: DateTime<Utc>,
}

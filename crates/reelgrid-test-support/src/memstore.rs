//! In-memory implementation of every store contract.
//!
//! Mirrors the SQL semantics closely enough for subsystem unit tests:
//! conflict targets, recovery sweeps, and the unknown-safe completion cache
//! behave like their Postgres counterparts.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use reelgrid_torrent_core::store::{
    AnnounceAttempt, AnnounceLog, CheckpointStore, CommandStore, CompletionStore,
    GenerationStatusStore, QueueStore, SeederStore, ServerStore, TorrentStore, TransferStore,
};
use reelgrid_torrent_core::{
    CommandAck, ContentCommand, GenerationProgress, InfoHash, Package, PendingTransfer,
    PieceCheckpoint, QueueItem, QueueStatus, QueueStatusEntry, SeedableTorrent, ServerRow,
    TorrentRecord, TorrentStatusReport, Transfer, TransferCommand, TransferProgressUpdate,
    TransferStatus,
};

#[derive(Debug, Clone)]
struct QueueRow {
    item: QueueItem,
    progress: GenerationProgress,
}

#[derive(Debug, Clone)]
struct TransferRow {
    transfer: Transfer,
    priority: i32,
    download_speed_bps: i64,
    upload_speed_bps: i64,
    peers_connected: i32,
    eta_seconds: Option<i64>,
}

#[derive(Debug, Clone)]
struct QueuedTransferCommand {
    server_id: Uuid,
    command: TransferCommand,
    ack: Option<CommandAck>,
}

#[derive(Debug, Clone)]
struct QueuedContentCommand {
    server_id: Uuid,
    command: ContentCommand,
    ack: Option<CommandAck>,
}

#[derive(Debug, Default)]
struct State {
    packages: HashMap<Uuid, Package>,
    torrents: HashMap<Uuid, TorrentRecord>,
    inventory: HashMap<(Uuid, Uuid), String>,
    queue: Vec<QueueRow>,
    checkpoints: HashMap<(Uuid, Uuid), HashMap<u32, [u8; 20]>>,
    completion: HashMap<(InfoHash, u32), bool>,
    transfers: HashMap<Uuid, TransferRow>,
    transfer_commands: Vec<QueuedTransferCommand>,
    content_commands: Vec<QueuedContentCommand>,
    seeders: HashMap<(Uuid, Uuid), (String, DateTime<Utc>)>,
    servers: HashMap<Uuid, ServerRow>,
    server_torrent_status: HashMap<(Uuid, Uuid), (String, Option<String>)>,
    ingestion: Vec<(Uuid, Uuid, String)>,
    announces: Vec<AnnounceAttempt>,
    reports: Vec<TorrentStatusReport>,
}

/// Shared in-memory store for tests.
#[derive(Debug, Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    /// Fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a queue row directly, for recovery tests.
    pub fn insert_queue_row(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        status: QueueStatus,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().queue.push(QueueRow {
            item: QueueItem {
                id,
                package_id,
                server_id,
                status,
                cancelled: false,
                error_message: None,
                created_at,
            },
            progress: GenerationProgress::default(),
        });
        id
    }

    /// All queue rows, for assertions.
    #[must_use]
    pub fn queue_rows(&self) -> Vec<QueueItem> {
        self.lock().queue.iter().map(|row| row.item.clone()).collect()
    }

    /// Recorded generation progress for `(package, node)`.
    #[must_use]
    pub fn generation_progress(&self, package_id: Uuid, server_id: Uuid) -> Option<GenerationProgress> {
        self.lock()
            .queue
            .iter()
            .find(|row| row.item.package_id == package_id && row.item.server_id == server_id)
            .map(|row| row.progress.clone())
    }

    /// Number of checkpoint rows for `(package, node)`.
    #[must_use]
    pub fn checkpoint_count(&self, package_id: Uuid, server_id: Uuid) -> usize {
        self.lock()
            .checkpoints
            .get(&(package_id, server_id))
            .map_or(0, HashMap::len)
    }

    /// Completion rows recorded for an info-hash.
    #[must_use]
    pub fn completion_rows(&self, info_hash: &InfoHash) -> Vec<(u32, bool)> {
        let mut rows: Vec<(u32, bool)> = self
            .lock()
            .completion
            .iter()
            .filter(|((hash, _), _)| hash == info_hash)
            .map(|((_, index), completed)| (*index, *completed))
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Ingestion tracking rows, for assertions.
    #[must_use]
    pub fn ingestion_rows(&self) -> Vec<(Uuid, Uuid, String)> {
        self.lock().ingestion.clone()
    }

    /// Ingested status reports, for assertions.
    #[must_use]
    pub fn reports(&self) -> Vec<TorrentStatusReport> {
        self.lock().reports.clone()
    }

    /// Recorded announce attempts, for assertions.
    #[must_use]
    pub fn announce_attempts(&self) -> Vec<AnnounceAttempt> {
        self.lock().announces.clone()
    }

    /// Full transfer row, for assertions.
    #[must_use]
    pub fn transfer_row(&self, transfer_id: Uuid) -> Option<Transfer> {
        self.lock()
            .transfers
            .get(&transfer_id)
            .map(|row| row.transfer.clone())
    }

    /// Acked transfer commands `(id, result label)`, for assertions.
    #[must_use]
    pub fn transfer_command_acks(&self) -> Vec<(Uuid, String)> {
        self.lock()
            .transfer_commands
            .iter()
            .filter_map(|row| {
                row.ack.as_ref().map(|ack| {
                    (
                        row.command.id,
                        format!("{:?}", ack.result).to_lowercase(),
                    )
                })
            })
            .collect()
    }

    /// Seeder rows `(torrent, server)`, for assertions.
    #[must_use]
    pub fn seeder_rows(&self) -> Vec<(Uuid, Uuid)> {
        self.lock().seeders.keys().copied().collect()
    }

    /// Server torrent status rows, for assertions.
    #[must_use]
    pub fn server_torrent_status_rows(&self) -> Vec<((Uuid, Uuid), (String, Option<String>))> {
        self.lock()
            .server_torrent_status
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for MemStore {
    async fn load_checkpoints(
        &self,
        package_id: Uuid,
        server_id: Uuid,
    ) -> Result<Vec<PieceCheckpoint>> {
        let state = self.lock();
        let mut checkpoints: Vec<PieceCheckpoint> = state
            .checkpoints
            .get(&(package_id, server_id))
            .map(|map| {
                map.iter()
                    .map(|(piece_index, hash)| PieceCheckpoint {
                        piece_index: *piece_index,
                        hash: *hash,
                    })
                    .collect()
            })
            .unwrap_or_default();
        checkpoints.sort_by_key(|cp| cp.piece_index);
        Ok(checkpoints)
    }

    async fn save_checkpoint_batch(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        batch: &[PieceCheckpoint],
    ) -> Result<()> {
        let mut state = self.lock();
        let map = state.checkpoints.entry((package_id, server_id)).or_default();
        for checkpoint in batch {
            map.insert(checkpoint.piece_index, checkpoint.hash);
        }
        Ok(())
    }

    async fn clear_checkpoints(&self, package_id: Uuid, server_id: Uuid) -> Result<()> {
        self.lock().checkpoints.remove(&(package_id, server_id));
        Ok(())
    }
}

#[async_trait]
impl GenerationStatusStore for MemStore {
    async fn update_generation_progress(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        progress: &GenerationProgress,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state
            .queue
            .iter_mut()
            .find(|row| row.item.package_id == package_id && row.item.server_id == server_id)
        {
            row.progress = progress.clone();
        }
        Ok(())
    }

    async fn generation_cancelled(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        Ok(self
            .lock()
            .queue
            .iter()
            .find(|row| row.item.package_id == package_id && row.item.server_id == server_id)
            .is_some_and(|row| row.item.cancelled))
    }
}

#[async_trait]
impl CompletionStore for MemStore {
    async fn piece_complete(
        &self,
        info_hash: &InfoHash,
        piece_index: u32,
    ) -> Result<Option<bool>> {
        Ok(self.lock().completion.get(&(*info_hash, piece_index)).copied())
    }

    async fn known_pieces(&self, info_hash: &InfoHash) -> Result<Vec<(u32, bool)>> {
        Ok(self.completion_rows(info_hash))
    }

    async fn set_piece_complete(
        &self,
        info_hash: &InfoHash,
        piece_index: u32,
        complete: bool,
    ) -> Result<()> {
        self.lock().completion.insert((*info_hash, piece_index), complete);
        Ok(())
    }

    async fn mark_all_complete(&self, info_hash: &InfoHash, piece_count: u32) -> Result<()> {
        let mut state = self.lock();
        for index in 0..piece_count {
            state.completion.insert((*info_hash, index), true);
        }
        Ok(())
    }

    async fn clear_pieces(&self, info_hash: &InfoHash) -> Result<()> {
        self.lock().completion.retain(|(hash, _), _| hash != info_hash);
        Ok(())
    }

    async fn purge_incomplete_rows(&self) -> Result<u64> {
        let mut state = self.lock();
        let before = state.completion.len();
        state.completion.retain(|_, completed| *completed);
        Ok((before - state.completion.len()) as u64)
    }
}

#[async_trait]
impl TorrentStore for MemStore {
    async fn upsert_package(&self, package: &Package) -> Result<()> {
        let mut state = self.lock();
        let exists = state
            .packages
            .values()
            .any(|p| p.asset_map_uuid == package.asset_map_uuid);
        if !exists {
            state.packages.insert(package.id, package.clone());
        }
        Ok(())
    }

    async fn save_torrent(&self, record: &TorrentRecord) -> Result<Uuid> {
        let mut state = self.lock();
        if let Some(existing) = state
            .torrents
            .values()
            .find(|t| t.info_hash == record.info_hash)
        {
            return Ok(existing.id);
        }
        state.torrents.insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn torrent_by_info_hash(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>> {
        Ok(self
            .lock()
            .torrents
            .values()
            .find(|t| t.info_hash == *info_hash)
            .cloned())
    }

    async fn torrent_by_id(&self, torrent_id: Uuid) -> Result<Option<TorrentRecord>> {
        Ok(self.lock().torrents.get(&torrent_id).cloned())
    }

    async fn torrent_for_package(&self, package_id: Uuid) -> Result<Option<TorrentRecord>> {
        Ok(self
            .lock()
            .torrents
            .values()
            .find(|t| t.package_id == package_id)
            .cloned())
    }

    async fn seedable_torrents(&self, server_id: Uuid) -> Result<Vec<SeedableTorrent>> {
        let state = self.lock();
        let mut seedable = Vec::new();
        for torrent in state.torrents.values() {
            if let Some(local_path) = state.inventory.get(&(torrent.package_id, server_id)) {
                seedable.push(SeedableTorrent {
                    torrent: torrent.clone(),
                    local_path: local_path.clone(),
                });
            }
        }
        seedable.sort_by_key(|s| s.torrent.created_at);
        Ok(seedable)
    }

    async fn upsert_inventory(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        self.lock()
            .inventory
            .insert((package_id, server_id), local_path.to_string());
        Ok(())
    }

    async fn remove_inventory(&self, package_id: Uuid, server_id: Uuid) -> Result<()> {
        self.lock().inventory.remove(&(package_id, server_id));
        Ok(())
    }

    async fn inventory_path(&self, package_id: Uuid, server_id: Uuid) -> Result<Option<String>> {
        Ok(self.lock().inventory.get(&(package_id, server_id)).cloned())
    }
}

#[async_trait]
impl QueueStore for MemStore {
    async fn enqueue(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        let exists = state
            .queue
            .iter()
            .any(|row| row.item.package_id == package_id && row.item.server_id == server_id);
        if exists {
            return Ok(false);
        }
        state.queue.push(QueueRow {
            item: QueueItem {
                id: Uuid::new_v4(),
                package_id,
                server_id,
                status: QueueStatus::Queued,
                cancelled: false,
                error_message: None,
                created_at: Utc::now(),
            },
            progress: GenerationProgress::default(),
        });
        Ok(true)
    }

    async fn next_queued(&self, server_id: Uuid) -> Result<Option<QueueItem>> {
        let state = self.lock();
        let mut candidates: Vec<&QueueRow> = state
            .queue
            .iter()
            .filter(|row| {
                row.item.server_id == server_id
                    && row.item.status == QueueStatus::Queued
                    && state
                        .inventory
                        .contains_key(&(row.item.package_id, server_id))
            })
            .collect();
        candidates.sort_by_key(|row| row.item.created_at);
        Ok(candidates.first().map(|row| row.item.clone()))
    }

    async fn other_node_generating(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        Ok(self.lock().queue.iter().any(|row| {
            row.item.package_id == package_id
                && row.item.server_id != server_id
                && row.item.status == QueueStatus::Generating
        }))
    }

    async fn mark_generating(&self, queue_id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state.queue.iter_mut().find(|row| row.item.id == queue_id) {
            row.item.status = QueueStatus::Generating;
        }
        Ok(())
    }

    async fn finish(
        &self,
        queue_id: Uuid,
        status: QueueStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state.queue.iter_mut().find(|row| row.item.id == queue_id) {
            row.item.status = status;
            row.item.error_message = message.map(str::to_string);
        }
        Ok(())
    }

    async fn delete_item(&self, queue_id: Uuid) -> Result<()> {
        self.lock().queue.retain(|row| row.item.id != queue_id);
        Ok(())
    }

    async fn request_cancel(&self, queue_id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state.queue.iter_mut().find(|row| row.item.id == queue_id) {
            row.item.cancelled = true;
        }
        Ok(())
    }

    async fn delete_completed_rows(&self) -> Result<u64> {
        let mut state = self.lock();
        let before = state.queue.len();
        state
            .queue
            .retain(|row| row.item.status != QueueStatus::Completed);
        Ok((before - state.queue.len()) as u64)
    }

    async fn reset_own_rows(&self, server_id: Uuid) -> Result<u64> {
        let mut state = self.lock();
        let mut reset = 0u64;
        for row in &mut state.queue {
            if row.item.server_id == server_id
                && matches!(
                    row.item.status,
                    QueueStatus::Generating | QueueStatus::Failed
                )
            {
                row.item.status = QueueStatus::Queued;
                row.item.cancelled = false;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reclaim_orphaned_rows(&self, server_id: Uuid) -> Result<u64> {
        let mut state = self.lock();

        // De-duplicate foreign generating rows per package, keeping the oldest.
        let mut keep: HashMap<Uuid, (Uuid, DateTime<Utc>)> = HashMap::new();
        for row in &state.queue {
            if row.item.status == QueueStatus::Generating && row.item.server_id != server_id {
                keep.entry(row.item.package_id)
                    .and_modify(|(id, at)| {
                        if row.item.created_at < *at {
                            *id = row.item.id;
                            *at = row.item.created_at;
                        }
                    })
                    .or_insert((row.item.id, row.item.created_at));
            }
        }
        state.queue.retain(|row| {
            row.item.status != QueueStatus::Generating
                || row.item.server_id == server_id
                || keep
                    .get(&row.item.package_id)
                    .is_some_and(|(id, _)| *id == row.item.id)
        });

        // Reclaim surviving foreign rows unless this node already has a row
        // for the package.
        let own_packages: Vec<Uuid> = state
            .queue
            .iter()
            .filter(|row| row.item.server_id == server_id)
            .map(|row| row.item.package_id)
            .collect();
        let mut reclaimed = 0u64;
        state.queue.retain_mut(|row| {
            if row.item.status != QueueStatus::Generating || row.item.server_id == server_id {
                return true;
            }
            if own_packages.contains(&row.item.package_id) {
                return false;
            }
            row.item.server_id = server_id;
            row.item.status = QueueStatus::Queued;
            row.item.cancelled = false;
            reclaimed += 1;
            true
        });
        Ok(reclaimed)
    }

    async fn active_entries(&self, server_id: Uuid) -> Result<Vec<QueueStatusEntry>> {
        Ok(self
            .lock()
            .queue
            .iter()
            .filter(|row| {
                row.item.server_id == server_id
                    && matches!(
                        row.item.status,
                        QueueStatus::Queued | QueueStatus::Generating
                    )
            })
            .map(|row| QueueStatusEntry {
                package_id: row.item.package_id,
                status: row.item.status.as_str().to_string(),
                progress_percent: row.progress.progress_percent,
                hashing_speed_bps: i64::try_from(row.progress.hashing_speed_bps)
                    .unwrap_or(i64::MAX),
                current_file: row.progress.current_file.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TransferStore for MemStore {
    async fn create_transfer(
        &self,
        torrent_id: Uuid,
        destination_server_id: Uuid,
        requested_by: Option<&str>,
    ) -> Result<Uuid> {
        let mut state = self.lock();
        let torrent = state
            .torrents
            .get(&torrent_id)
            .ok_or_else(|| anyhow::anyhow!("unknown torrent {torrent_id}"))?
            .clone();
        let id = Uuid::new_v4();
        state.transfers.insert(
            id,
            TransferRow {
                transfer: Transfer {
                    id,
                    torrent_id,
                    info_hash: torrent.info_hash,
                    package_id: torrent.package_id,
                    destination_server_id,
                    requested_by: requested_by.map(str::to_string),
                    status: TransferStatus::Queued,
                    progress_percent: 0.0,
                    downloaded_bytes: 0,
                    error_message: None,
                    created_at: Utc::now(),
                },
                priority: 0,
                download_speed_bps: 0,
                upload_speed_bps: 0,
                peers_connected: 0,
                eta_seconds: None,
            },
        );
        Ok(id)
    }

    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>> {
        let state = self.lock();
        let mut rows: Vec<&TransferRow> = state
            .transfers
            .values()
            .filter(|row| {
                row.transfer.destination_server_id == server_id
                    && row.transfer.status == TransferStatus::Queued
            })
            .collect();
        rows.sort_by_key(|row| (row.priority, row.transfer.created_at));
        Ok(rows
            .into_iter()
            .map(|row| {
                let package_name = state
                    .packages
                    .get(&row.transfer.package_id)
                    .map_or_else(String::new, |p| p.name.clone());
                let total_size_bytes = state
                    .packages
                    .get(&row.transfer.package_id)
                    .map_or(0, |p| p.total_size_bytes);
                PendingTransfer {
                    id: row.transfer.id,
                    torrent_id: row.transfer.torrent_id,
                    info_hash: row.transfer.info_hash,
                    package_id: row.transfer.package_id,
                    package_name,
                    status: row.transfer.status.as_str().to_string(),
                    total_size_bytes,
                    priority: row.priority,
                }
            })
            .collect())
    }

    async fn transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        Ok(self.transfer_row(transfer_id))
    }

    async fn apply_transfer_update(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()> {
        let mut state = self.lock();
        let Some(row) = state.transfers.get_mut(&transfer_id) else {
            return Ok(());
        };
        if let Some(status) = &update.status {
            row.transfer.status = status.parse()?;
        }
        if let Some(progress) = update.progress_percent {
            row.transfer.progress_percent = progress;
        }
        if let Some(bytes) = update.downloaded_bytes {
            row.transfer.downloaded_bytes = bytes;
        }
        if let Some(speed) = update.download_speed_bps {
            row.download_speed_bps = speed;
        }
        if let Some(speed) = update.upload_speed_bps {
            row.upload_speed_bps = speed;
        }
        if let Some(peers) = update.peers_connected {
            row.peers_connected = peers;
        }
        if let Some(eta) = update.eta_seconds {
            row.eta_seconds = Some(eta);
        }
        if let Some(message) = &update.error_message {
            row.transfer.error_message = Some(message.clone());
        }
        Ok(())
    }

    async fn set_transfer_status(
        &self,
        transfer_id: Uuid,
        status: TransferStatus,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state.transfers.get_mut(&transfer_id) {
            row.transfer.status = status;
        }
        Ok(())
    }

    async fn downloading_transfers(&self, server_id: Uuid) -> Result<Vec<Transfer>> {
        let state = self.lock();
        let mut rows: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|row| {
                row.transfer.destination_server_id == server_id
                    && row.transfer.status == TransferStatus::Downloading
            })
            .map(|row| row.transfer.clone())
            .collect();
        rows.sort_by_key(|transfer| transfer.created_at);
        Ok(rows)
    }
}

#[async_trait]
impl SeederStore for MemStore {
    async fn upsert_seeder(
        &self,
        torrent_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        self.lock()
            .seeders
            .insert((torrent_id, server_id), (local_path.to_string(), Utc::now()));
        Ok(())
    }

    async fn remove_seeder(&self, torrent_id: Uuid, server_id: Uuid) -> Result<()> {
        self.lock().seeders.remove(&(torrent_id, server_id));
        Ok(())
    }

    async fn seeder_count(&self, torrent_id: Uuid) -> Result<i64> {
        let cutoff = Utc::now() - Duration::minutes(10);
        let live = self
            .lock()
            .seeders
            .iter()
            .filter(|((t, _), (_, seen))| *t == torrent_id && *seen > cutoff)
            .count();
        Ok(i64::try_from(live).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl ServerStore for MemStore {
    async fn upsert_server(&self, row: &ServerRow) -> Result<()> {
        self.lock().servers.insert(row.id, row.clone());
        Ok(())
    }

    async fn server(&self, server_id: Uuid) -> Result<Option<ServerRow>> {
        Ok(self.lock().servers.get(&server_id).cloned())
    }

    async fn record_server_torrent_status(
        &self,
        server_id: Uuid,
        torrent_id: Uuid,
        status: &str,
        message: Option<&str>,
    ) -> Result<()> {
        self.lock().server_torrent_status.insert(
            (server_id, torrent_id),
            (status.to_string(), message.map(str::to_string)),
        );
        Ok(())
    }

    async fn create_ingestion_tracking(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        self.lock()
            .ingestion
            .push((package_id, server_id, local_path.to_string()));
        Ok(())
    }

    async fn ingest_status_report(&self, report: &TorrentStatusReport) -> Result<()> {
        let mut state = self.lock();
        if report.is_full_sync {
            state
                .server_torrent_status
                .retain(|(server, _), _| *server != report.server_id);
        }
        for entry in &report.torrents {
            if let Some(torrent_id) = entry.torrent_id {
                state.server_torrent_status.insert(
                    (report.server_id, torrent_id),
                    (entry.status.clone(), entry.error_message.clone()),
                );
            }
        }
        state.reports.push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl CommandStore for MemStore {
    async fn queue_transfer_command(
        &self,
        server_id: Uuid,
        command: &TransferCommand,
    ) -> Result<()> {
        self.lock().transfer_commands.push(QueuedTransferCommand {
            server_id,
            command: command.clone(),
            ack: None,
        });
        Ok(())
    }

    async fn queue_content_command(
        &self,
        server_id: Uuid,
        command: &ContentCommand,
    ) -> Result<()> {
        self.lock().content_commands.push(QueuedContentCommand {
            server_id,
            command: command.clone(),
            ack: None,
        });
        Ok(())
    }

    async fn pending_transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>> {
        Ok(self
            .lock()
            .transfer_commands
            .iter()
            .filter(|row| row.server_id == server_id && row.ack.is_none())
            .map(|row| row.command.clone())
            .collect())
    }

    async fn pending_content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>> {
        Ok(self
            .lock()
            .content_commands
            .iter()
            .filter(|row| row.server_id == server_id && row.ack.is_none())
            .map(|row| row.command.clone())
            .collect())
    }

    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state
            .transfer_commands
            .iter_mut()
            .find(|row| row.server_id == server_id && row.command.id == ack.command_id)
        {
            row.ack = Some(ack.clone());
        }
        Ok(())
    }

    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        let mut state = self.lock();
        if let Some(row) = state
            .content_commands
            .iter_mut()
            .find(|row| row.server_id == server_id && row.command.id == ack.command_id)
        {
            row.ack = Some(ack.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AnnounceLog for MemStore {
    async fn record_announce(&self, attempt: &AnnounceAttempt) -> Result<()> {
        self.lock().announces.push(attempt.clone());
        Ok(())
    }
}

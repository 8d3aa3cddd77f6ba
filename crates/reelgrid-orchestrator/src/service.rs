//! Main-node half: dispatcher, progress sink, report ingest, and command
//! queues, exposed to clients through the control API.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::info;
use uuid::Uuid;

use reelgrid_torrent_core::store::{
    CommandStore, QueueStore, SeederStore, ServerStore, TorrentStore, TransferStore,
};
use reelgrid_torrent_core::{
    CommandAck, ContentCommand, ContentCommandAction, InfoHash, PendingTransfer, QueueCheck,
    SeederRegistration, TorrentStatusReport, TransferCommand, TransferCommandAction,
    TransferProgressUpdate,
};

/// Store-backed implementation of the main node's control surface.
#[derive(Clone)]
pub struct MainService {
    torrents: Arc<dyn TorrentStore>,
    transfers: Arc<dyn TransferStore>,
    commands: Arc<dyn CommandStore>,
    seeders: Arc<dyn SeederStore>,
    servers: Arc<dyn ServerStore>,
    queue: Arc<dyn QueueStore>,
}

impl MainService {
    /// Assemble the service over the metadata store.
    #[must_use]
    pub fn new(
        torrents: Arc<dyn TorrentStore>,
        transfers: Arc<dyn TransferStore>,
        commands: Arc<dyn CommandStore>,
        seeders: Arc<dyn SeederStore>,
        servers: Arc<dyn ServerStore>,
        queue: Arc<dyn QueueStore>,
    ) -> Self {
        Self {
            torrents,
            transfers,
            commands,
            seeders,
            servers,
            queue,
        }
    }

    /// Queued transfers for a destination node.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>> {
        self.transfers.pending_transfers(server_id).await
    }

    /// Raw .torrent payload for an info-hash.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub async fn torrent_file(&self, info_hash: &InfoHash) -> Result<Vec<u8>> {
        let record = self
            .torrents
            .torrent_by_info_hash(info_hash)
            .await?
            .ok_or_else(|| anyhow!("no torrent for info-hash {info_hash}"))?;
        Ok(record.file_bytes)
    }

    /// Apply a destination-owned progress patch.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()> {
        self.transfers
            .apply_transfer_update(transfer_id, update)
            .await
    }

    /// Register a node as a seeder and mirror its inventory row.
    ///
    /// # Errors
    ///
    /// Fails when the torrent is unknown.
    pub async fn register_seeder(
        &self,
        info_hash: &InfoHash,
        registration: &SeederRegistration,
    ) -> Result<()> {
        let record = self
            .torrents
            .torrent_by_info_hash(info_hash)
            .await?
            .ok_or_else(|| anyhow!("no torrent for info-hash {info_hash}"))?;
        self.seeders
            .upsert_seeder(record.id, registration.server_id, &registration.local_path)
            .await?;
        self.torrents
            .upsert_inventory(
                record.package_id,
                registration.server_id,
                &registration.local_path,
            )
            .await?;
        info!(
            info_hash = %info_hash,
            server_id = %registration.server_id,
            "seeder registered"
        );
        Ok(())
    }

    /// Ingest a node's status report.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn ingest_status_report(&self, report: &TorrentStatusReport) -> Result<()> {
        self.servers.ingest_status_report(report).await
    }

    /// Pending transfer commands for a node.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>> {
        self.commands.pending_transfer_commands(server_id).await
    }

    /// Pending content commands for a node.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>> {
        self.commands.pending_content_commands(server_id).await
    }

    /// Acknowledge a transfer command.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.commands.ack_transfer_command(server_id, ack).await
    }

    /// Acknowledge a content command.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.commands.ack_content_command(server_id, ack).await
    }

    /// Duplicate-work probe backing `/torrent-queue/check`.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn queue_check(&self, package_id: Uuid) -> Result<QueueCheck> {
        let torrent_exists = self
            .torrents
            .torrent_for_package(package_id)
            .await?
            .is_some();
        let already_in_progress = self
            .queue
            .other_node_generating(package_id, Uuid::nil())
            .await?;
        Ok(QueueCheck {
            already_in_progress,
            torrent_exists,
        })
    }

    /// Create a transfer row (assignment authority lives on main).
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn create_transfer(
        &self,
        torrent_id: Uuid,
        destination_server_id: Uuid,
        requested_by: Option<&str>,
    ) -> Result<Uuid> {
        self.transfers
            .create_transfer(torrent_id, destination_server_id, requested_by)
            .await
    }

    /// Queue a pause/resume/cancel for a destination node.
    ///
    /// # Errors
    ///
    /// Fails when the transfer is unknown.
    pub async fn queue_transfer_command(
        &self,
        transfer_id: Uuid,
        action: TransferCommandAction,
    ) -> Result<Uuid> {
        let transfer = self
            .transfers
            .transfer(transfer_id)
            .await?
            .ok_or_else(|| anyhow!("no transfer {transfer_id}"))?;
        let command = TransferCommand {
            id: Uuid::new_v4(),
            transfer_id,
            action,
        };
        self.commands
            .queue_transfer_command(transfer.destination_server_id, &command)
            .await
            .context("failed to queue transfer command")?;
        Ok(command.id)
    }

    /// Queue a content delete for a node.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn queue_content_command(
        &self,
        server_id: Uuid,
        torrent_id: Uuid,
        target_path: Option<String>,
    ) -> Result<Uuid> {
        let command = ContentCommand {
            id: Uuid::new_v4(),
            torrent_id,
            action: ContentCommandAction::Delete,
            target_path,
        };
        self.commands
            .queue_content_command(server_id, &command)
            .await
            .context("failed to queue content command")?;
        Ok(command.id)
    }

    /// Live seeder count for a torrent.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn seeder_count(&self, torrent_id: Uuid) -> Result<i64> {
        self.seeders.seeder_count(torrent_id).await
    }
}

//! Transfer rows and the main-node command queues.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use reelgrid_torrent_core::store::{CommandStore, TransferStore};
use reelgrid_torrent_core::{
    CommandAck, ContentCommand, ContentCommandAction, PendingTransfer, Transfer,
    TransferCommand, TransferCommandAction, TransferProgressUpdate, TransferStatus,
};

use crate::store::MetaStore;

#[derive(Debug, FromRow)]
struct TransferRow {
    id: Uuid,
    torrent_id: Uuid,
    info_hash: String,
    package_id: Uuid,
    destination_server_id: Uuid,
    requested_by: Option<String>,
    status: String,
    progress_percent: f64,
    downloaded_bytes: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransferRow {
    fn into_transfer(self) -> Result<Transfer> {
        Ok(Transfer {
            id: self.id,
            torrent_id: self.torrent_id,
            info_hash: self.info_hash.parse()?,
            package_id: self.package_id,
            destination_server_id: self.destination_server_id,
            requested_by: self.requested_by,
            status: self.status.parse()?,
            progress_percent: self.progress_percent,
            downloaded_bytes: self.downloaded_bytes,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

const SELECT_TRANSFER: &str =
    "SELECT t.id, t.torrent_id, tor.info_hash, tor.package_id, t.destination_server_id,
            t.requested_by, t.status, t.progress_percent, t.downloaded_bytes,
            t.error_message, t.created_at
     FROM transfers t
     JOIN torrents tor ON tor.id = t.torrent_id";

#[async_trait]
impl TransferStore for MetaStore {
    async fn create_transfer(
        &self,
        torrent_id: Uuid,
        destination_server_id: Uuid,
        requested_by: Option<&str>,
    ) -> Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO transfers (torrent_id, destination_server_id, requested_by)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(torrent_id)
        .bind(destination_server_id)
        .bind(requested_by)
        .fetch_one(self.pool())
        .await
        .context("failed to create transfer")?;
        Ok(id)
    }

    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>> {
        let rows: Vec<(Uuid, Uuid, String, Uuid, String, String, i64, i32)> = sqlx::query_as(
            "SELECT t.id, t.torrent_id, tor.info_hash, tor.package_id, p.name,
                    t.status, p.total_size_bytes, t.priority
             FROM transfers t
             JOIN torrents tor ON tor.id = t.torrent_id
             JOIN packages p ON p.id = tor.package_id
             WHERE t.destination_server_id = $1 AND t.status = 'queued'
             ORDER BY t.priority, t.created_at",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list pending transfers")?;

        let mut pending = Vec::with_capacity(rows.len());
        for (id, torrent_id, info_hash, package_id, package_name, status, size, priority) in rows
        {
            pending.push(PendingTransfer {
                id,
                torrent_id,
                info_hash: info_hash.parse()?,
                package_id,
                package_name,
                status,
                total_size_bytes: size,
                priority,
            });
        }
        Ok(pending)
    }

    async fn transfer(&self, transfer_id: Uuid) -> Result<Option<Transfer>> {
        let row: Option<TransferRow> =
            sqlx::query_as(&format!("{SELECT_TRANSFER} WHERE t.id = $1"))
                .bind(transfer_id)
                .fetch_optional(self.pool())
                .await
                .context("failed to load transfer")?;
        row.map(TransferRow::into_transfer).transpose()
    }

    async fn apply_transfer_update(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transfers
             SET status = COALESCE($2, status),
                 progress_percent = COALESCE($3, progress_percent),
                 downloaded_bytes = COALESCE($4, downloaded_bytes),
                 download_speed_bps = COALESCE($5, download_speed_bps),
                 upload_speed_bps = COALESCE($6, upload_speed_bps),
                 peers_connected = COALESCE($7, peers_connected),
                 eta_seconds = COALESCE($8, eta_seconds),
                 error_message = COALESCE($9, error_message),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(transfer_id)
        .bind(update.status.as_deref())
        .bind(update.progress_percent)
        .bind(update.downloaded_bytes)
        .bind(update.download_speed_bps)
        .bind(update.upload_speed_bps)
        .bind(update.peers_connected)
        .bind(update.eta_seconds)
        .bind(update.error_message.as_deref())
        .execute(self.pool())
        .await
        .context("failed to apply transfer update")?;
        Ok(())
    }

    async fn set_transfer_status(
        &self,
        transfer_id: Uuid,
        status: TransferStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transfers SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(transfer_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .context("failed to set transfer status")?;
        Ok(())
    }

    async fn downloading_transfers(&self, server_id: Uuid) -> Result<Vec<Transfer>> {
        let rows: Vec<TransferRow> = sqlx::query_as(&format!(
            "{SELECT_TRANSFER}
             WHERE t.destination_server_id = $1 AND t.status = 'downloading'
             ORDER BY t.created_at"
        ))
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list downloading transfers")?;
        rows.into_iter().map(TransferRow::into_transfer).collect()
    }
}

#[async_trait]
impl CommandStore for MetaStore {
    async fn queue_transfer_command(
        &self,
        server_id: Uuid,
        command: &TransferCommand,
    ) -> Result<()> {
        let (action, delete_data) = match &command.action {
            TransferCommandAction::Pause => ("pause", false),
            TransferCommandAction::Resume => ("resume", false),
            TransferCommandAction::Cancel { delete_data } => ("cancel", *delete_data),
        };
        sqlx::query(
            "INSERT INTO transfer_commands (id, server_id, transfer_id, action, delete_data)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(command.id)
        .bind(server_id)
        .bind(command.transfer_id)
        .bind(action)
        .bind(delete_data)
        .execute(self.pool())
        .await
        .context("failed to queue transfer command")?;
        Ok(())
    }

    async fn queue_content_command(
        &self,
        server_id: Uuid,
        command: &ContentCommand,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_commands (id, server_id, torrent_id, action, target_path)
             VALUES ($1, $2, $3, 'delete', $4)",
        )
        .bind(command.id)
        .bind(server_id)
        .bind(command.torrent_id)
        .bind(command.target_path.as_deref())
        .execute(self.pool())
        .await
        .context("failed to queue content command")?;
        Ok(())
    }

    async fn pending_transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>> {
        let rows: Vec<(Uuid, Uuid, String, bool)> = sqlx::query_as(
            "SELECT id, transfer_id, action, delete_data
             FROM transfer_commands
             WHERE server_id = $1 AND acked = FALSE
             ORDER BY created_at",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list pending transfer commands")?;

        let mut commands = Vec::with_capacity(rows.len());
        for (id, transfer_id, action, delete_data) in rows {
            let action = match action.as_str() {
                "pause" => TransferCommandAction::Pause,
                "resume" => TransferCommandAction::Resume,
                "cancel" => TransferCommandAction::Cancel { delete_data },
                other => return Err(anyhow!("unknown transfer command action '{other}'")),
            };
            commands.push(TransferCommand {
                id,
                transfer_id,
                action,
            });
        }
        Ok(commands)
    }

    async fn pending_content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>> {
        let rows: Vec<(Uuid, Uuid, Option<String>)> = sqlx::query_as(
            "SELECT id, torrent_id, target_path
             FROM content_commands
             WHERE server_id = $1 AND acked = FALSE
             ORDER BY created_at",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to list pending content commands")?;
        Ok(rows
            .into_iter()
            .map(|(id, torrent_id, target_path)| ContentCommand {
                id,
                torrent_id,
                action: ContentCommandAction::Delete,
                target_path,
            })
            .collect())
    }

    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        sqlx::query(
            "UPDATE transfer_commands
             SET acked = TRUE, result = $3, message = $4, acked_at = now()
             WHERE id = $1 AND server_id = $2",
        )
        .bind(ack.command_id)
        .bind(server_id)
        .bind(result_label(ack))
        .bind(&ack.message)
        .execute(self.pool())
        .await
        .context("failed to ack transfer command")?;
        Ok(())
    }

    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        sqlx::query(
            "UPDATE content_commands
             SET acked = TRUE, result = $3, message = $4, acked_at = now()
             WHERE id = $1 AND server_id = $2",
        )
        .bind(ack.command_id)
        .bind(server_id)
        .bind(result_label(ack))
        .bind(&ack.message)
        .execute(self.pool())
        .await
        .context("failed to ack content command")?;
        Ok(())
    }
}

const fn result_label(ack: &CommandAck) -> &'static str {
    match ack.result {
        reelgrid_torrent_core::CommandResult::Done => "done",
        reelgrid_torrent_core::CommandResult::Deleted => "deleted",
        reelgrid_torrent_core::CommandResult::Kept => "kept",
        reelgrid_torrent_core::CommandResult::Error => "error",
    }
}

//! Progress and error sinks wired into the swarm client.
//!
//! The main node writes the shared store directly; client nodes push the
//! same facts to main over HTTP, because the destination owns the progress
//! fields but main owns the rows.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use reelgrid_swarm::{ProgressSink, TorrentStats, TransferErrorReporter};
use reelgrid_torrent_core::store::TransferStore;
use reelgrid_torrent_core::{SeederRegistration, TransferProgressUpdate, TransferStatus};

use crate::api::MainApi;

fn progress_update(stats: &TorrentStats) -> TransferProgressUpdate {
    TransferProgressUpdate {
        status: None,
        progress_percent: Some(stats.progress_percent),
        downloaded_bytes: Some(i64::try_from(stats.downloaded_bytes).unwrap_or(i64::MAX)),
        download_speed_bps: Some(i64::try_from(stats.download_speed_bps).unwrap_or(i64::MAX)),
        upload_speed_bps: Some(i64::try_from(stats.upload_speed_bps).unwrap_or(i64::MAX)),
        peers_connected: Some(i32::try_from(stats.peers_connected).unwrap_or(i32::MAX)),
        eta_seconds: stats
            .eta_seconds
            .map(|eta| i64::try_from(eta).unwrap_or(i64::MAX)),
        error_message: None,
    }
}

/// Main-node sink: progress lands straight in the transfer rows.
pub struct MainSink {
    transfers: Arc<dyn TransferStore>,
}

impl MainSink {
    /// Wrap the transfer store.
    #[must_use]
    pub fn new(transfers: Arc<dyn TransferStore>) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl ProgressSink for MainSink {
    async fn report_progress(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()> {
        self.transfers
            .apply_transfer_update(transfer_id, &progress_update(stats))
            .await
    }

    async fn transfer_completed(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()> {
        let mut update = progress_update(stats);
        update.status = Some(TransferStatus::Completed.as_str().to_string());
        update.progress_percent = Some(100.0);
        self.transfers
            .apply_transfer_update(transfer_id, &update)
            .await?;
        info!(transfer_id = %transfer_id, "transfer completed");
        Ok(())
    }
}

#[async_trait]
impl TransferErrorReporter for MainSink {
    async fn report_error(&self, transfer_id: Uuid, status: &str, message: &str) -> Result<()> {
        self.transfers
            .apply_transfer_update(
                transfer_id,
                &TransferProgressUpdate {
                    status: Some(status.to_string()),
                    error_message: Some(message.to_string()),
                    ..TransferProgressUpdate::default()
                },
            )
            .await
    }
}

/// Client-node sink: progress and errors flow to main over HTTP, and a
/// finished download registers this node as a seeder on main.
pub struct ClientSink {
    api: Arc<dyn MainApi>,
    server_id: Uuid,
}

impl ClientSink {
    /// Wrap the HTTP control-plane client.
    #[must_use]
    pub fn new(api: Arc<dyn MainApi>, server_id: Uuid) -> Self {
        Self { api, server_id }
    }
}

#[async_trait]
impl ProgressSink for ClientSink {
    async fn report_progress(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()> {
        self.api
            .update_transfer(transfer_id, &progress_update(stats))
            .await
    }

    async fn transfer_completed(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()> {
        let mut update = progress_update(stats);
        update.status = Some(TransferStatus::Completed.as_str().to_string());
        update.progress_percent = Some(100.0);
        self.api.update_transfer(transfer_id, &update).await?;

        // Future restarts restore seeding from the mirrored rows main keeps
        // for this registration.
        self.api
            .register_seeder(
                &stats.info_hash,
                &SeederRegistration {
                    server_id: self.server_id,
                    local_path: stats.local_path.clone(),
                },
            )
            .await?;
        info!(transfer_id = %transfer_id, "transfer completed and seeder registered on main");
        Ok(())
    }
}

#[async_trait]
impl TransferErrorReporter for ClientSink {
    async fn report_error(&self, transfer_id: Uuid, status: &str, message: &str) -> Result<()> {
        self.api
            .update_transfer(
                transfer_id,
                &TransferProgressUpdate {
                    status: Some(status.to_string()),
                    error_message: Some(message.to_string()),
                    ..TransferProgressUpdate::default()
                },
            )
            .await
    }
}


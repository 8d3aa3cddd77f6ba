//! Client-side pending-transfer poller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use reelgrid_bencode::Metainfo;
use reelgrid_swarm::SwarmClient;
use reelgrid_torrent_core::{TransferProgressUpdate, TransferStatus};

use crate::api::MainApi;

/// Polls main for queued transfers and starts their downloads.
pub struct TransferPoller {
    api: Arc<dyn MainApi>,
    swarm: Arc<SwarmClient>,
    server_id: Uuid,
    download_dir: PathBuf,
}

impl TransferPoller {
    /// Assemble the poller.
    #[must_use]
    pub fn new(
        api: Arc<dyn MainApi>,
        swarm: Arc<SwarmClient>,
        server_id: Uuid,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            swarm,
            server_id,
            download_dir,
        }
    }

    /// Poll until `shutdown` flips, with a 15 to 30 second jittered cadence
    /// so a fleet of clients does not stampede main.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = Duration::from_secs(rand::rng().random_range(15..=30));
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if let Err(err) = self.poll_once().await {
                        warn!(error = %err, "pending-transfer poll failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One poll: claim every queued transfer assigned to this node.
    ///
    /// # Errors
    ///
    /// Returns an error when the pending list cannot be fetched; individual
    /// transfers failing to start are reported and skipped.
    pub async fn poll_once(&self) -> Result<usize> {
        let pending = self
            .api
            .pending_transfers(self.server_id)
            .await
            .context("failed to fetch pending transfers")?;
        let mut started = 0usize;
        for transfer in pending {
            match self.start_transfer(&transfer).await {
                Ok(()) => started += 1,
                Err(err) => {
                    warn!(
                        error = %err,
                        transfer_id = %transfer.id,
                        "failed to start pending transfer"
                    );
                    let update = TransferProgressUpdate {
                        status: Some(TransferStatus::Error.as_str().to_string()),
                        error_message: Some(err.to_string()),
                        ..TransferProgressUpdate::default()
                    };
                    if let Err(err) = self.api.update_transfer(transfer.id, &update).await {
                        warn!(error = %err, "failed to report transfer start failure");
                    }
                }
            }
        }
        Ok(started)
    }

    async fn start_transfer(
        &self,
        transfer: &reelgrid_torrent_core::PendingTransfer,
    ) -> Result<()> {
        let bytes = self
            .api
            .torrent_file(&transfer.info_hash)
            .await
            .context("failed to fetch torrent payload")?;
        let name = Metainfo::parse(&bytes)
            .context("fetched torrent payload is malformed")?
            .info()
            .context("fetched torrent has a malformed info dictionary")?
            .name;
        let dest = self.download_dir.join(name);

        self.swarm
            .start_download(
                &bytes,
                &dest,
                transfer.package_id,
                transfer.torrent_id,
                transfer.id,
            )
            .await
            .context("failed to start download")?;

        // Only after a successful start may the row observe `downloading`.
        self.api
            .update_transfer(
                transfer.id,
                &TransferProgressUpdate {
                    status: Some(TransferStatus::Downloading.as_str().to_string()),
                    ..TransferProgressUpdate::default()
                },
            )
            .await
            .context("failed to claim transfer")?;
        info!(
            transfer_id = %transfer.id,
            package = %transfer.package_name,
            "transfer claimed and download started"
        );
        Ok(())
    }
}

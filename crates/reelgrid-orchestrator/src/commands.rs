//! Client-side command poller: pause, resume, cancel, delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use reelgrid_swarm::{ActiveTorrentView, SwarmClient};
use reelgrid_torrent_core::store::{CompletionStore, TorrentStore};
use reelgrid_torrent_core::{
    CommandAck, CommandResult, ContentCommand, TransferCommand, TransferCommandAction,
};

use crate::api::MainApi;

/// Command poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polls main for commands and acknowledges every one it processes.
pub struct CommandPoller {
    api: Arc<dyn MainApi>,
    swarm: Arc<SwarmClient>,
    completion: Arc<dyn CompletionStore>,
    torrents: Arc<dyn TorrentStore>,
    server_id: Uuid,
    download_dir: PathBuf,
}

impl CommandPoller {
    /// Assemble the poller.
    #[must_use]
    pub fn new(
        api: Arc<dyn MainApi>,
        swarm: Arc<SwarmClient>,
        completion: Arc<dyn CompletionStore>,
        torrents: Arc<dyn TorrentStore>,
        server_id: Uuid,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            swarm,
            completion,
            torrents,
            server_id,
            download_dir,
        }
    }

    /// Poll until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(err) = self.poll_once().await {
                        warn!(error = %err, "command poll failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One poll over both command channels.
    ///
    /// # Errors
    ///
    /// Returns an error when a command list cannot be fetched.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut processed = 0usize;
        for command in self
            .api
            .transfer_commands(self.server_id)
            .await
            .context("failed to fetch transfer commands")?
        {
            let ack = self.handle_transfer_command(&command).await;
            if let Err(err) = self.api.ack_transfer_command(self.server_id, &ack).await {
                warn!(error = %err, command_id = %command.id, "failed to ack transfer command");
            }
            processed += 1;
        }
        for command in self
            .api
            .content_commands(self.server_id)
            .await
            .context("failed to fetch content commands")?
        {
            let ack = self.handle_content_command(&command).await;
            if let Err(err) = self.api.ack_content_command(self.server_id, &ack).await {
                warn!(error = %err, command_id = %command.id, "failed to ack content command");
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn view_for_transfer(&self, transfer_id: Uuid) -> Option<ActiveTorrentView> {
        self.swarm
            .active_views()
            .await
            .into_iter()
            .find(|view| view.transfer_id == Some(transfer_id))
    }

    async fn handle_transfer_command(&self, command: &TransferCommand) -> CommandAck {
        let Some(view) = self.view_for_transfer(command.transfer_id).await else {
            return ack(command.id, CommandResult::Error, "transfer is not active");
        };
        match &command.action {
            TransferCommandAction::Pause => {
                match self.swarm.pause_torrent(view.info_hash).await {
                    Ok(()) => ack(command.id, CommandResult::Done, "paused"),
                    Err(err) => ack(command.id, CommandResult::Error, &err.to_string()),
                }
            }
            TransferCommandAction::Resume => {
                match self.swarm.resume_torrent(view.info_hash).await {
                    Ok(()) => ack(command.id, CommandResult::Done, "resumed"),
                    Err(err) => ack(command.id, CommandResult::Error, &err.to_string()),
                }
            }
            TransferCommandAction::Cancel { delete_data } => {
                self.cancel_transfer(command.id, &view, *delete_data).await
            }
        }
    }

    async fn cancel_transfer(
        &self,
        command_id: Uuid,
        view: &ActiveTorrentView,
        delete_data: bool,
    ) -> CommandAck {
        if let Err(err) = self.swarm.stop_torrent(view.info_hash).await {
            return ack(command_id, CommandResult::Error, &err.to_string());
        }
        if !delete_data {
            info!(info_hash = %view.info_hash, "transfer cancelled, data kept");
            return ack(command_id, CommandResult::Done, "cancelled");
        }
        if !path_is_contained(&view.local_path, &self.download_dir) {
            warn!(
                path = %view.local_path.display(),
                "refusing to delete data outside the download directory"
            );
            return ack(
                command_id,
                CommandResult::Kept,
                "path resolves outside the download directory",
            );
        }
        if let Err(err) = tokio::fs::remove_dir_all(&view.local_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                return ack(command_id, CommandResult::Error, &err.to_string());
            }
        }
        if let Err(err) = self.completion.clear_pieces(&view.info_hash).await {
            warn!(error = %err, "failed to clear piece completion after cancel");
        }
        info!(info_hash = %view.info_hash, "transfer cancelled, data deleted");
        ack(command_id, CommandResult::Deleted, "cancelled and deleted")
    }

    async fn handle_content_command(&self, command: &ContentCommand) -> CommandAck {
        let record = match self.torrents.torrent_by_id(command.torrent_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return ack(command.id, CommandResult::Error, "unknown torrent"),
            Err(err) => return ack(command.id, CommandResult::Error, &err.to_string()),
        };

        let view = self
            .swarm
            .active_views()
            .await
            .into_iter()
            .find(|view| view.info_hash == record.info_hash);
        if let Some(view) = &view {
            if let Err(err) = self.swarm.stop_torrent(view.info_hash).await {
                return ack(command.id, CommandResult::Error, &err.to_string());
            }
        }

        let target = match (&command.target_path, &view) {
            (Some(explicit), _) => PathBuf::from(explicit),
            (None, Some(view)) => view.local_path.clone(),
            (None, None) => {
                match self
                    .torrents
                    .inventory_path(record.package_id, self.server_id)
                    .await
                {
                    Ok(Some(path)) => PathBuf::from(path),
                    Ok(None) => {
                        return ack(command.id, CommandResult::Kept, "no local copy to delete");
                    }
                    Err(err) => {
                        return ack(command.id, CommandResult::Error, &err.to_string());
                    }
                }
            }
        };

        // Explicit target paths come from main's authority; inferred paths
        // must resolve under the download directory.
        if command.target_path.is_none() && !path_is_contained(&target, &self.download_dir) {
            warn!(
                path = %target.display(),
                "refusing content delete outside the download directory"
            );
            return ack(
                command.id,
                CommandResult::Kept,
                "path resolves outside the download directory",
            );
        }
        if let Err(err) = tokio::fs::remove_dir_all(&target).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                return ack(command.id, CommandResult::Error, &err.to_string());
            }
        }
        if let Err(err) = self.completion.clear_pieces(&record.info_hash).await {
            warn!(error = %err, "failed to clear piece completion after delete");
        }
        if let Err(err) = self
            .torrents
            .remove_inventory(record.package_id, self.server_id)
            .await
        {
            warn!(error = %err, "failed to remove inventory row after delete");
        }
        info!(torrent_id = %command.torrent_id, path = %target.display(), "content deleted");
        ack(command.id, CommandResult::Deleted, "content deleted")
    }
}

fn ack(command_id: Uuid, result: CommandResult, message: &str) -> CommandAck {
    CommandAck {
        command_id,
        result,
        message: message.to_string(),
    }
}

/// Whether `path` resolves under `root`, following symlinks when both exist.
fn path_is_contained(path: &Path, root: &Path) -> bool {
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    canonical_path.starts_with(&canonical_root) && canonical_path != canonical_root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_rejects_outside_and_root_itself() {
        let root = Path::new("/data/incoming");
        assert!(path_is_contained(Path::new("/data/incoming/PKG"), root));
        assert!(!path_is_contained(Path::new("/data/elsewhere/PKG"), root));
        assert!(!path_is_contained(Path::new("/data/incoming"), root));
        assert!(!path_is_contained(Path::new("/"), root));
    }

    #[test]
    fn containment_follows_symlinks_when_real() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("incoming");
        std::fs::create_dir_all(root.join("PKG")).expect("dirs");
        assert!(path_is_contained(&root.join("PKG"), &root));
        assert!(!path_is_contained(dir.path(), &root));
    }
}

//! Wire DTOs exchanged between client nodes and the main node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::InfoHash;

/// One row of `GET /servers/{id}/pending-transfers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransfer {
    /// Transfer identifier.
    pub id: Uuid,
    /// Torrent row identifier.
    pub torrent_id: Uuid,
    /// Swarm identifier used to fetch the .torrent payload.
    pub info_hash: InfoHash,
    /// Package identifier.
    pub package_id: Uuid,
    /// Package display name.
    pub package_name: String,
    /// Transfer status label at dispatch time.
    pub status: String,
    /// Total payload size in bytes.
    pub total_size_bytes: i64,
    /// Dispatch priority; lower runs first.
    pub priority: i32,
}

/// Body of `PUT /transfers/{id}`; every field optional so the destination
/// patches only what it owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferProgressUpdate {
    /// New status label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Completion percentage from 0 to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    /// Verified bytes on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<i64>,
    /// Instantaneous download rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_speed_bps: Option<i64>,
    /// Instantaneous upload rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_speed_bps: Option<i64>,
    /// Connected peer count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers_connected: Option<i32>,
    /// Smoothed completion estimate in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    /// Failure description when status is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Action requested for an in-flight transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransferCommandAction {
    /// Stop piece requests and close connections.
    Pause,
    /// Restore connections and re-issue the download.
    Resume,
    /// Stop the torrent; optionally delete local data.
    Cancel {
        /// Whether the local payload should be removed.
        delete_data: bool,
    },
}

/// One queued transfer command polled by the destination node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    /// Command identifier echoed in the acknowledgement.
    pub id: Uuid,
    /// Transfer the command applies to.
    pub transfer_id: Uuid,
    /// Requested action.
    #[serde(flatten)]
    pub action: TransferCommandAction,
}

/// Action requested for locally stored content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ContentCommandAction {
    /// Stop seeding and delete the local copy.
    Delete,
}

/// One queued content command polled by the owning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCommand {
    /// Command identifier echoed in the acknowledgement.
    pub id: Uuid,
    /// Torrent whose content is targeted.
    pub torrent_id: Uuid,
    /// Requested action.
    #[serde(flatten)]
    pub action: ContentCommandAction,
    /// Explicit path override used for the containment check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

/// Outcome of a processed command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandResult {
    /// Command applied.
    Done,
    /// Content removed from disk.
    Deleted,
    /// Content intentionally left in place.
    Kept,
    /// Command failed; see the message.
    Error,
}

/// Acknowledgement posted back after processing a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    /// Identifier of the processed command.
    pub command_id: Uuid,
    /// Outcome classification.
    pub result: CommandResult,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

/// Per-torrent entry inside a [`TorrentStatusReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStatusEntry {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Torrent row identifier when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torrent_id: Option<Uuid>,
    /// Transfer this torrent serves, when downloading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<Uuid>,
    /// Classified status label (`downloading`, `seeding`, `checking`, ...).
    pub status: String,
    /// Completion percentage from 0 to 100.
    pub progress_percent: f64,
    /// Instantaneous download rate.
    pub download_speed_bps: i64,
    /// Instantaneous upload rate.
    pub upload_speed_bps: i64,
    /// Connected peer count.
    pub peers_connected: i32,
    /// Smoothed completion estimate in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    /// Failure description for errored torrents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Queue item surfaced so main can show fleet-wide hashing progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatusEntry {
    /// Package being hashed.
    pub package_id: Uuid,
    /// Queue status label (`queued` or `generating`).
    pub status: String,
    /// Hashing completion percentage.
    pub progress_percent: f64,
    /// Hashing throughput in bytes per second.
    pub hashing_speed_bps: i64,
    /// File currently being read.
    #[serde(default)]
    pub current_file: String,
}

/// Body of `POST /servers/{id}/torrent-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentStatusReport {
    /// Reporting node.
    pub server_id: Uuid,
    /// Set on the first report after boot so main reconciles stale rows.
    pub is_full_sync: bool,
    /// Per-torrent entries.
    pub torrents: Vec<TorrentStatusEntry>,
    /// Active queue items on the reporting node.
    #[serde(default)]
    pub queue: Vec<QueueStatusEntry>,
}

/// Body of `POST /torrents/{info_hash}/seeders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeederRegistration {
    /// Node that now seeds the torrent.
    pub server_id: Uuid,
    /// Absolute package path on that node.
    pub local_path: String,
}

/// Body of `GET /torrent-queue/check`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueCheck {
    /// Another node is already hashing the package.
    pub already_in_progress: bool,
    /// A torrent row already exists for the package.
    pub torrent_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_command_action_json_shape() {
        let command = TransferCommand {
            id: Uuid::nil(),
            transfer_id: Uuid::nil(),
            action: TransferCommandAction::Cancel { delete_data: true },
        };
        let json = serde_json::to_value(&command).expect("serialize");
        assert_eq!(json["action"], "cancel");
        assert_eq!(json["delete_data"], true);
        let back: TransferCommand = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.action, TransferCommandAction::Cancel { delete_data: true });
    }

    #[test]
    fn progress_update_skips_unset_fields() {
        let update = TransferProgressUpdate {
            progress_percent: Some(42.0),
            ..TransferProgressUpdate::default()
        };
        let json = serde_json::to_string(&update).expect("serialize");
        assert_eq!(json, "{\"progress_percent\":42.0}");
    }

    #[test]
    fn command_result_labels() {
        assert_eq!(
            serde_json::to_string(&CommandResult::Deleted).expect("serialize"),
            "\"deleted\""
        );
    }
}

//! Core identifiers, enums, and durable entity views.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use thiserror::Error;
use uuid::Uuid;

/// Piece length applied below [`PIECE_LENGTH_THRESHOLD`]: 16 MiB.
pub const PIECE_LENGTH_SMALL: u64 = 16 * 1024 * 1024;
/// Piece length applied at or above [`PIECE_LENGTH_THRESHOLD`]: 32 MiB.
pub const PIECE_LENGTH_LARGE: u64 = 32 * 1024 * 1024;
/// Package size at which the larger piece length kicks in: 100 GiB.
pub const PIECE_LENGTH_THRESHOLD: u64 = 100 * 1024 * 1024 * 1024;

/// Select the piece length for a package of `total_bytes`.
#[must_use]
pub const fn piece_length_for_total(total_bytes: u64) -> u64 {
    if total_bytes < PIECE_LENGTH_THRESHOLD {
        PIECE_LENGTH_SMALL
    } else {
        PIECE_LENGTH_LARGE
    }
}

/// Errors raised while decoding an [`InfoHash`] from its hex form.
#[derive(Debug, Error)]
pub enum InfoHashError {
    /// The hex string did not decode to exactly 20 bytes.
    #[error("info-hash must be 40 hex characters, got {len}")]
    BadLength {
        /// Length of the offending input.
        len: usize,
    },
    /// The input contained non-hex characters.
    #[error("info-hash contains non-hex characters")]
    BadEncoding,
}

/// 20-byte SHA-1 over the canonical info dictionary bytes; the primary
/// identifier of a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Compute the info-hash of raw info dictionary bytes.
    #[must_use]
    pub fn of_info_bytes(info_bytes: &[u8]) -> Self {
        Self(Sha1::digest(info_bytes).into())
    }

    /// Borrow the underlying digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex rendering used in URLs and database rows.
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(InfoHashError::BadLength { len: s.len() });
        }
        let decoded = hex::decode(s).map_err(|_| InfoHashError::BadEncoding)?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Client prefix baked into every peer ID this fleet announces with.
const PEER_ID_PREFIX: &str = "-OC0001-";

/// Stable 20-byte peer identifier of shape `-OC0001-{node8}{hash4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Derive the stable peer ID for a `(node, info-hash)` pair.
    ///
    /// The same inputs always produce the same 20 bytes, which is what keeps
    /// tracker liveness refreshes from multiplying peers.
    #[must_use]
    pub fn for_seeder(server_id: Uuid, info_hash: &InfoHash) -> Self {
        let node = server_id.simple().to_string();
        let hash = info_hash.to_hex();
        let composed = format!(
            "{PEER_ID_PREFIX}{}{}",
            &node[..8.min(node.len())],
            &hash[..4.min(hash.len())]
        );
        Self::from_truncated(composed.as_bytes())
    }

    /// Build a peer ID from arbitrary bytes, truncated or zero-padded to 20.
    #[must_use]
    pub fn from_truncated(bytes: &[u8]) -> Self {
        let mut id = [0u8; 20];
        let take = bytes.len().min(20);
        id[..take].copy_from_slice(&bytes[..take]);
        Self(id)
    }

    /// Borrow the raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lossy string rendering for logs and swarm snapshots.
    #[must_use]
    pub fn display(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// Role a node plays in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Hosts the tracker, dispatches transfers, ingests reports.
    Main,
    /// Polls the main node for work and commands.
    Client,
}

impl FromStr for ServerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "client" => Ok(Self::Client),
            other => Err(anyhow::anyhow!("invalid server mode '{other}'")),
        }
    }
}

impl ServerMode {
    /// Lowercase label stored in server rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Client => "client",
        }
    }
}

/// Generation queue item states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for a generator worker.
    Queued,
    /// A worker is hashing the package right now.
    Generating,
    /// Hashing finished; the row is transient and culled at startup.
    Completed,
    /// Hashing failed; the message column carries the category.
    Failed,
    /// Cancelled cooperatively at a checkpoint boundary.
    Cancelled,
}

impl QueueStatus {
    /// Lowercase label stored in queue rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(anyhow::anyhow!("invalid queue status '{other}'")),
        }
    }
}

/// Replication transfer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Created by the UI, not yet claimed by the destination.
    Queued,
    /// The destination called `start_download` successfully.
    Downloading,
    /// All pieces verified on the destination.
    Completed,
    /// A persistent failure was recorded.
    Error,
    /// Cancelled via the command channel.
    Cancelled,
    /// Paused via the command channel.
    Paused,
}

impl TransferStatus {
    /// Lowercase label stored in transfer rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            "paused" => Ok(Self::Paused),
            other => Err(anyhow::anyhow!("invalid transfer status '{other}'")),
        }
    }
}

/// A content bundle; immutable once ingested, unique by asset-map UUID.
#[derive(Debug, Clone)]
pub struct Package {
    /// Stable identifier.
    pub id: Uuid,
    /// ASSETMAP UUID from the DCP manifest.
    pub asset_map_uuid: Uuid,
    /// Directory basename.
    pub name: String,
    /// Optional display title from the CPL.
    pub title: Option<String>,
    /// Total payload bytes.
    pub total_size_bytes: i64,
    /// Number of files in the bundle.
    pub file_count: i32,
}

/// Durable torrent row: metadata for exactly one package.
#[derive(Debug, Clone)]
pub struct TorrentRecord {
    /// Primary key.
    pub id: Uuid,
    /// Package this torrent describes.
    pub package_id: Uuid,
    /// Canonical swarm identifier.
    pub info_hash: InfoHash,
    /// Piece length in bytes.
    pub piece_size: i64,
    /// Number of pieces.
    pub total_pieces: i32,
    /// Raw .torrent payload as persisted at generation time.
    pub file_bytes: Vec<u8>,
    /// Node that generated the torrent.
    pub created_by_server: Uuid,
    /// Generation timestamp.
    pub created_at: DateTime<Utc>,
}

/// One pending or running generation task scoped to `(package, node)`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Primary key.
    pub id: Uuid,
    /// Package to hash.
    pub package_id: Uuid,
    /// Node that owns the task.
    pub server_id: Uuid,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Cooperative cancellation flag polled at checkpoint boundaries.
    pub cancelled: bool,
    /// Optional failure categorisation.
    pub error_message: Option<String>,
    /// Row creation time, used for oldest-first scheduling.
    pub created_at: DateTime<Utc>,
}

/// Progress snapshot written to the queue row while hashing runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationProgress {
    /// Completion percentage from 0 to 100.
    pub progress_percent: f64,
    /// File currently being read.
    pub current_file: String,
    /// Bytes hashed per second since the run started.
    pub hashing_speed_bps: u64,
}

/// One `(piece index, SHA-1)` checkpoint tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceCheckpoint {
    /// Piece index within the package stream.
    pub piece_index: u32,
    /// 20-byte piece hash.
    pub hash: [u8; 20],
}

/// A replication intent owned jointly by main (assignment, cancellation) and
/// the destination node (progress fields).
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Primary key.
    pub id: Uuid,
    /// Torrent being replicated.
    pub torrent_id: Uuid,
    /// Swarm identifier, denormalised for the destination.
    pub info_hash: InfoHash,
    /// Package being replicated.
    pub package_id: Uuid,
    /// Destination node.
    pub destination_server_id: Uuid,
    /// Operator who requested the transfer.
    pub requested_by: Option<String>,
    /// Lifecycle state.
    pub status: TransferStatus,
    /// Completion percentage from 0 to 100.
    pub progress_percent: f64,
    /// Verified bytes on the destination.
    pub downloaded_bytes: i64,
    /// Optional failure description surfaced to the UI.
    pub error_message: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// A torrent row joined with this node's inventory path, ready to seed.
#[derive(Debug, Clone)]
pub struct SeedableTorrent {
    /// The torrent metadata row.
    pub torrent: TorrentRecord,
    /// Absolute package path on this node.
    pub local_path: String,
}

/// A node registration row.
#[derive(Debug, Clone)]
pub struct ServerRow {
    /// Primary key; stable node identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Fleet role.
    pub mode: ServerMode,
    /// Base URL clients use to reach this node's control API.
    pub base_url: Option<String>,
    /// Liveness timestamp refreshed by the owning process.
    pub last_seen: DateTime<Utc>,
}

//! Engine session seam and the disk-backed implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use reelgrid_bencode::InfoDict;
use reelgrid_torrent_core::InfoHash;
use reelgrid_torrent_core::store::CompletionStore;

use crate::storage::StorageLayout;

/// Default connection cap restored by resume.
pub(crate) const DEFAULT_CONNECTION_CAP: u32 = 50;

/// One torrent handed to the session.
pub struct SessionTorrent {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Parsed info dictionary.
    pub info: InfoDict,
    /// Storage binding for reads and writes.
    pub layout: StorageLayout,
}

/// Counters and verification state surfaced per torrent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Cumulative payload bytes read from disk.
    pub bytes_read_data: u64,
    /// Cumulative payload bytes written to disk.
    pub bytes_written_data: u64,
    /// Pieces verified against their hashes.
    pub verified_pieces: u32,
    /// Total piece count.
    pub total_pieces: u32,
    /// Bytes covered by verified pieces.
    pub verified_bytes: u64,
    /// Total payload bytes.
    pub total_bytes: u64,
    /// Peers currently connected.
    pub peers_connected: u32,
    /// Established-connection cap (zero while paused).
    pub connection_cap: u32,
}

impl SessionStats {
    /// Completion percentage from 0 to 100.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                (self.verified_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        }
    }
}

/// Engine data-plane seam.
///
/// The swarm client drives torrents exclusively through this trait, the way
/// the rest of the stack drives the store through its contracts; tests plug
/// in scripted sessions.
#[async_trait]
pub trait SwarmSession: Send + Sync {
    /// Admit a torrent with its storage binding.
    async fn register(&self, torrent: SessionTorrent) -> Result<()>;

    /// Drop a torrent; piece-completion rows survive by design.
    async fn deregister(&self, info_hash: &InfoHash) -> Result<()>;

    /// Kick a full verification pass (the `download_all` trigger).
    async fn verify_all(&self, info_hash: &InfoHash) -> Result<SessionStats>;

    /// Cancel all outstanding piece requests.
    async fn cancel_requests(&self, info_hash: &InfoHash) -> Result<()>;

    /// Set the established-connection cap (0 pauses data flow).
    async fn set_connection_cap(&self, info_hash: &InfoHash, cap: u32) -> Result<()>;

    /// Write a payload block at a global offset.
    async fn write_block(&self, info_hash: &InfoHash, offset: u64, data: &[u8]) -> Result<()>;

    /// Current counters for one torrent.
    async fn stats(&self, info_hash: &InfoHash) -> Result<SessionStats>;

    /// Update the connected-peer gauge (fed from tracker state).
    async fn set_peer_count(&self, info_hash: &InfoHash, peers: u32) -> Result<()>;
}

struct TorrentState {
    info: Arc<InfoDict>,
    layout: StorageLayout,
    verified: std::sync::Mutex<Vec<bool>>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    peers: AtomicU32,
    cap: AtomicU32,
}

impl TorrentState {
    fn stats_snapshot(&self) -> SessionStats {
        let (verified_pieces, verified_bytes) = {
            let verified = self
                .verified
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let count = verified.iter().filter(|bit| **bit).count();
            let bytes = verified_bytes_for(&self.info, &verified);
            (u32::try_from(count).unwrap_or(u32::MAX), bytes)
        };
        SessionStats {
            bytes_read_data: self.bytes_read.load(Ordering::Relaxed),
            bytes_written_data: self.bytes_written.load(Ordering::Relaxed),
            verified_pieces,
            total_pieces: u32::try_from(self.info.piece_count()).unwrap_or(u32::MAX),
            verified_bytes,
            total_bytes: self.info.total_bytes(),
            peers_connected: self.peers.load(Ordering::Relaxed),
            connection_cap: self.cap.load(Ordering::Relaxed),
        }
    }
}

fn verified_bytes_for(info: &InfoDict, verified: &[bool]) -> u64 {
    let total = info.total_bytes();
    let piece_length = info.piece_length;
    verified
        .iter()
        .enumerate()
        .filter(|(_, bit)| **bit)
        .map(|(index, _)| {
            let start = index as u64 * piece_length;
            piece_length.min(total.saturating_sub(start))
        })
        .sum()
}

/// Disk-backed session: verification straight off the filesystem with the
/// shared piece-completion cache as the unknown-safe fast path.
pub struct DiskSession {
    torrents: RwLock<HashMap<InfoHash, Arc<TorrentState>>>,
    completion: Arc<dyn CompletionStore>,
}

impl DiskSession {
    /// Create a session backed by the shared completion store.
    #[must_use]
    pub fn new(completion: Arc<dyn CompletionStore>) -> Self {
        Self {
            torrents: RwLock::new(HashMap::new()),
            completion,
        }
    }

    async fn state(&self, info_hash: &InfoHash) -> Result<Arc<TorrentState>> {
        self.torrents
            .read()
            .await
            .get(info_hash)
            .cloned()
            .ok_or_else(|| anyhow!("torrent {info_hash} is not registered with the session"))
    }
}

#[async_trait]
impl SwarmSession for DiskSession {
    async fn register(&self, torrent: SessionTorrent) -> Result<()> {
        let piece_count = torrent.info.piece_count();
        let state = Arc::new(TorrentState {
            info: Arc::new(torrent.info),
            layout: torrent.layout,
            verified: std::sync::Mutex::new(vec![false; piece_count]),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            peers: AtomicU32::new(0),
            cap: AtomicU32::new(DEFAULT_CONNECTION_CAP),
        });
        let mut torrents = self.torrents.write().await;
        torrents.insert(torrent.info_hash, state);
        Ok(())
    }

    async fn deregister(&self, info_hash: &InfoHash) -> Result<()> {
        self.torrents.write().await.remove(info_hash);
        Ok(())
    }

    async fn verify_all(&self, info_hash: &InfoHash) -> Result<SessionStats> {
        let state = self.state(info_hash).await?;
        let known: HashMap<u32, bool> = self
            .completion
            .known_pieces(info_hash)
            .await
            .context("failed to load completion cache")?
            .into_iter()
            .collect();

        let pass_state = Arc::clone(&state);
        let outcome = tokio::task::spawn_blocking(move || verify_pass(&pass_state, &known))
            .await
            .context("verification task panicked")??;

        for index in &outcome.newly_verified {
            self.completion
                .set_piece_complete(info_hash, *index, true)
                .await
                .context("failed to record verified piece")?;
        }
        for index in &outcome.mismatched {
            self.completion
                .set_piece_complete(info_hash, *index, false)
                .await
                .context("failed to record failed piece")?;
        }
        if !outcome.mismatched.is_empty() {
            warn!(
                info_hash = %info_hash,
                mismatched = outcome.mismatched.len(),
                "pieces failed hash verification"
            );
        }
        debug!(
            info_hash = %info_hash,
            newly_verified = outcome.newly_verified.len(),
            cached = outcome.cache_hits,
            "verification pass finished"
        );
        Ok(state.stats_snapshot())
    }

    async fn cancel_requests(&self, info_hash: &InfoHash) -> Result<()> {
        // Requests are synthesized per verification pass; cancelling is a
        // bookkeeping no-op beyond confirming the torrent exists.
        self.state(info_hash).await.map(|_| ())
    }

    async fn set_connection_cap(&self, info_hash: &InfoHash, cap: u32) -> Result<()> {
        let state = self.state(info_hash).await?;
        state.cap.store(cap, Ordering::Relaxed);
        if cap == 0 {
            state.peers.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn write_block(&self, info_hash: &InfoHash, offset: u64, data: &[u8]) -> Result<()> {
        let state = self.state(info_hash).await?;
        let info = Arc::clone(&state.info);
        let layout = state.layout.clone();
        let owned = data.to_vec();
        let write_state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || {
            layout
                .write_block(&info, offset, &owned)
                .map(|()| owned.len() as u64)
                .map(|written| {
                    write_state.bytes_written.fetch_add(written, Ordering::Relaxed);
                })
        })
        .await
        .context("write task panicked")?
        .map_err(|err| anyhow!("{err}"))?;

        // Anything the block touched must re-verify.
        let piece_length = state.info.piece_length;
        let first = offset / piece_length;
        let last = (offset + data.len() as u64).saturating_sub(1) / piece_length;
        let mut verified = state
            .verified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for index in first..=last {
            if let Some(bit) = verified.get_mut(usize::try_from(index).unwrap_or(usize::MAX)) {
                *bit = false;
            }
        }
        Ok(())
    }

    async fn stats(&self, info_hash: &InfoHash) -> Result<SessionStats> {
        Ok(self.state(info_hash).await?.stats_snapshot())
    }

    async fn set_peer_count(&self, info_hash: &InfoHash, peers: u32) -> Result<()> {
        let state = self.state(info_hash).await?;
        state.peers.store(peers, Ordering::Relaxed);
        Ok(())
    }
}

struct VerifyOutcome {
    newly_verified: Vec<u32>,
    mismatched: Vec<u32>,
    cache_hits: usize,
}

fn verify_pass(state: &TorrentState, known: &HashMap<u32, bool>) -> Result<VerifyOutcome> {
    let piece_count = state.info.piece_count();
    let mut newly_verified = Vec::new();
    let mut mismatched = Vec::new();
    let mut cache_hits = 0usize;

    for index in 0..piece_count {
        let piece_index = u32::try_from(index).unwrap_or(u32::MAX);
        let already = {
            let verified = state
                .verified
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            verified.get(index).copied().unwrap_or(false)
        };
        if already {
            continue;
        }
        if known.get(&piece_index) == Some(&true) {
            cache_hits += 1;
            mark_verified(state, index, true);
            continue;
        }
        match state.layout.read_piece(&state.info, piece_index) {
            Ok(Some(data)) => {
                state
                    .bytes_read
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                let digest: [u8; 20] = Sha1::digest(&data).into();
                let expected = state.info.pieces.get(index).copied().unwrap_or([0u8; 20]);
                if digest == expected {
                    mark_verified(state, index, true);
                    newly_verified.push(piece_index);
                } else {
                    mark_verified(state, index, false);
                    mismatched.push(piece_index);
                }
            }
            Ok(None) => mark_verified(state, index, false),
            Err(err) => {
                return Err(anyhow!("failed to read piece {piece_index}: {err}"));
            }
        }
    }

    Ok(VerifyOutcome {
        newly_verified,
        mismatched,
        cache_hits,
    })
}

fn mark_verified(state: &TorrentState, index: usize, value: bool) {
    let mut verified = state
        .verified
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(bit) = verified.get_mut(index) {
        *bit = value;
    }
}

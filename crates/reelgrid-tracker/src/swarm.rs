//! In-memory swarm registry.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use reelgrid_torrent_core::{InfoHash, PeerId};

use crate::announce::AnnounceRequest;

/// Default announce interval handed to peers, in seconds.
pub(crate) const DEFAULT_INTERVAL_SECS: u32 = 60;
/// Peers idle longer than this are swept.
const PEER_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Cadence of the liveness sweep.
pub(crate) const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// One peer within a swarm.
#[derive(Debug, Clone)]
pub(crate) struct Peer {
    pub(crate) peer_id: Vec<u8>,
    pub(crate) ip: IpAddr,
    pub(crate) port: u16,
    #[allow(dead_code)]
    pub(crate) uploaded: i64,
    #[allow(dead_code)]
    pub(crate) downloaded: i64,
    pub(crate) left: i64,
    pub(crate) last_seen: DateTime<Utc>,
}

impl Peer {
    pub(crate) const fn is_seeder(&self) -> bool {
        self.left == 0
    }
}

/// Peers for one info-hash, keyed by peer-id.
///
/// Each swarm carries its own lock; the registry lock is always taken first.
#[derive(Debug, Default)]
struct Swarm {
    peers: RwLock<HashMap<Vec<u8>, Peer>>,
}

/// What one announce produced, fed back into the bencoded response.
#[derive(Debug, Clone)]
pub struct AnnounceOutcome {
    /// Announce interval to return, seconds.
    pub interval: u32,
    /// Seeder count across the swarm.
    pub complete: u32,
    /// Leecher count across the swarm.
    pub incomplete: u32,
    /// Peers excluding the requester.
    pub peers: Vec<PeerEntry>,
}

/// One peer as returned to an announcer or the snapshot view.
#[derive(Debug, Clone, Serialize)]
pub struct PeerEntry {
    /// Peer identifier, lossy UTF-8 for JSON output.
    pub peer_id: String,
    /// Raw peer identifier bytes for dict-format responses.
    #[serde(skip)]
    pub peer_id_bytes: Vec<u8>,
    /// Advertised address.
    pub ip: IpAddr,
    /// Advertised port.
    pub port: u16,
    /// Bytes left; zero marks a seeder.
    pub left: i64,
    /// Last announce time.
    pub last_seen: DateTime<Utc>,
}

impl From<&Peer> for PeerEntry {
    fn from(peer: &Peer) -> Self {
        Self {
            peer_id: String::from_utf8_lossy(&peer.peer_id).into_owned(),
            peer_id_bytes: peer.peer_id.clone(),
            ip: peer.ip,
            port: peer.port,
            left: peer.left,
            last_seen: peer.last_seen,
        }
    }
}

/// Read-only JSON view of one swarm.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmSnapshot {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Seeder count.
    pub seeders: u32,
    /// Leecher count.
    pub leechers: u32,
    /// Peers ordered most-recent first.
    pub peers: Vec<PeerEntry>,
}

/// Read-only JSON view of the whole tracker.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    /// Per-swarm views.
    pub swarms: Vec<SwarmSnapshot>,
    /// Total seeders across swarms.
    pub total_seeders: u32,
    /// Total leechers across swarms.
    pub total_leechers: u32,
}

/// Announce state for the fleet.
pub struct Tracker {
    swarms: RwLock<HashMap<InfoHash, Arc<Swarm>>>,
    announce_ip: Option<IpAddr>,
    interval: u32,
}

impl Tracker {
    /// Create a tracker; `announce_ip` replaces loopback announcer addresses.
    #[must_use]
    pub fn new(announce_ip: Option<IpAddr>) -> Self {
        Self {
            swarms: RwLock::new(HashMap::new()),
            announce_ip,
            interval: DEFAULT_INTERVAL_SECS,
        }
    }

    /// Apply the source-IP rule: loopback announcers become the configured
    /// public address when one is set.
    #[must_use]
    pub fn effective_ip(&self, source: IpAddr) -> IpAddr {
        match (source.is_loopback(), self.announce_ip) {
            (true, Some(public)) => public,
            _ => source,
        }
    }

    /// Process one validated announce.
    ///
    /// `stopped` deletes the peer; anything else upserts it. The returned
    /// peer list never contains the announcer.
    pub async fn announce(&self, request: &AnnounceRequest, ip: IpAddr) -> AnnounceOutcome {
        let swarm = self.swarm_for(request.info_hash).await;
        {
            let mut peers = swarm.peers.write().await;
            if request.event == "stopped" {
                // Unknown peers are a no-op.
                peers.remove(&request.peer_id);
            } else {
                peers.insert(
                    request.peer_id.clone(),
                    Peer {
                        peer_id: request.peer_id.clone(),
                        ip,
                        port: request.port,
                        uploaded: request.uploaded,
                        downloaded: request.downloaded,
                        left: request.left,
                        last_seen: Utc::now(),
                    },
                );
            }
        }

        let peers = swarm.peers.read().await;
        let complete = u32::try_from(peers.values().filter(|p| p.is_seeder()).count())
            .unwrap_or(u32::MAX);
        let incomplete = u32::try_from(peers.values().filter(|p| !p.is_seeder()).count())
            .unwrap_or(u32::MAX);
        let listed = peers
            .values()
            .filter(|peer| peer.peer_id != request.peer_id)
            .map(PeerEntry::from)
            .collect();
        AnnounceOutcome {
            interval: self.interval,
            complete,
            incomplete,
            peers: listed,
        }
    }

    /// Register a co-located seeder without HTTP.
    ///
    /// Alongside the public-facing entry, a loopback twin with a suffixed
    /// peer-id is inserted so clients on the same host can connect locally.
    pub async fn register_seeder(
        &self,
        info_hash: InfoHash,
        peer_id: &PeerId,
        ip: IpAddr,
        port: u16,
        bytes_left: i64,
    ) {
        let swarm = self.swarm_for(info_hash).await;
        let ip = self.effective_ip(ip);
        let mut peers = swarm.peers.write().await;
        let now = Utc::now();
        peers.insert(
            peer_id.as_bytes().to_vec(),
            Peer {
                peer_id: peer_id.as_bytes().to_vec(),
                ip,
                port,
                uploaded: 0,
                downloaded: 0,
                left: bytes_left,
                last_seen: now,
            },
        );

        // Suffix then truncate back to 20 bytes; the suffix must survive the
        // truncation or the twin would collide with the primary entry.
        let mut twin_id = peer_id.as_bytes().to_vec();
        twin_id.truncate(17);
        twin_id.extend_from_slice(b"-lo");
        twin_id.truncate(20);
        peers.insert(
            twin_id.clone(),
            Peer {
                peer_id: twin_id,
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                uploaded: 0,
                downloaded: 0,
                left: bytes_left,
                last_seen: now,
            },
        );
        debug!(info_hash = %info_hash, port, "seeder registered directly");
    }

    /// Sweep peers idle longer than the timeout; drops emptied swarms.
    pub async fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(PEER_TIMEOUT).unwrap_or(chrono::Duration::zero());
        let mut removed = 0usize;
        let mut empty = Vec::new();
        {
            let swarms = self.swarms.read().await;
            for (info_hash, swarm) in &*swarms {
                let mut peers = swarm.peers.write().await;
                let before = peers.len();
                peers.retain(|_, peer| peer.last_seen >= cutoff);
                removed += before - peers.len();
                if peers.is_empty() {
                    empty.push(*info_hash);
                }
            }
        }
        if !empty.is_empty() {
            let mut swarms = self.swarms.write().await;
            for info_hash in empty {
                if let Some(swarm) = swarms.get(&info_hash) {
                    if swarm.peers.read().await.is_empty() {
                        swarms.remove(&info_hash);
                    }
                }
            }
        }
        if removed > 0 {
            info!(removed, "expired stale tracker peers");
        }
    }

    /// Build the read-only snapshot for the UI.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        let swarms = self.swarms.read().await;
        let mut views = Vec::with_capacity(swarms.len());
        let mut total_seeders = 0u32;
        let mut total_leechers = 0u32;
        for (info_hash, swarm) in &*swarms {
            let peers = swarm.peers.read().await;
            let mut entries: Vec<PeerEntry> = peers.values().map(PeerEntry::from).collect();
            entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
            let seeders =
                u32::try_from(peers.values().filter(|p| p.is_seeder()).count()).unwrap_or(0);
            let leechers =
                u32::try_from(peers.values().filter(|p| !p.is_seeder()).count()).unwrap_or(0);
            total_seeders += seeders;
            total_leechers += leechers;
            views.push(SwarmSnapshot {
                info_hash: *info_hash,
                seeders,
                leechers,
                peers: entries,
            });
        }
        views.sort_by(|a, b| a.info_hash.cmp(&b.info_hash));
        TrackerSnapshot {
            swarms: views,
            total_seeders,
            total_leechers,
        }
    }

    /// Peer count for one swarm; used by tests and diagnostics.
    pub async fn swarm_size(&self, info_hash: InfoHash) -> usize {
        let swarms = self.swarms.read().await;
        match swarms.get(&info_hash) {
            Some(swarm) => swarm.peers.read().await.len(),
            None => 0,
        }
    }

    async fn swarm_for(&self, info_hash: InfoHash) -> Arc<Swarm> {
        {
            let swarms = self.swarms.read().await;
            if let Some(swarm) = swarms.get(&info_hash) {
                return Arc::clone(swarm);
            }
        }
        let mut swarms = self.swarms.write().await;
        Arc::clone(swarms.entry(info_hash).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hash(tag: &[u8]) -> InfoHash {
        InfoHash::of_info_bytes(tag)
    }

    fn request(
        info_hash: InfoHash,
        peer_id: &[u8],
        port: u16,
        left: i64,
        event: &str,
    ) -> AnnounceRequest {
        AnnounceRequest {
            info_hash,
            peer_id: peer_id.to_vec(),
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: event.to_string(),
            compact: true,
        }
    }

    #[tokio::test]
    async fn announce_upserts_and_counts() {
        let tracker = Tracker::new(None);
        let info_hash = hash(b"swarm-a");
        let outcome = tracker
            .announce(
                &request(info_hash, b"peer-1", 6881, 0, "started"),
                "10.0.0.1".parse().expect("ip"),
            )
            .await;
        assert_eq!(outcome.complete, 1);
        assert_eq!(outcome.incomplete, 0);
        assert!(outcome.peers.is_empty(), "announcer must be omitted");

        let outcome = tracker
            .announce(
                &request(info_hash, b"peer-2", 6882, 512, ""),
                "10.0.0.2".parse().expect("ip"),
            )
            .await;
        assert_eq!(outcome.complete, 1);
        assert_eq!(outcome.incomplete, 1);
        assert_eq!(outcome.peers.len(), 1);
        assert_eq!(outcome.peers[0].port, 6881);
    }

    #[tokio::test]
    async fn stopped_event_removes_peer_and_tolerates_unknowns() {
        let tracker = Tracker::new(None);
        let info_hash = hash(b"swarm-b");
        let ip: IpAddr = "10.0.0.1".parse().expect("ip");
        tracker
            .announce(&request(info_hash, b"peer-1", 6881, 0, "started"), ip)
            .await;
        assert_eq!(tracker.swarm_size(info_hash).await, 1);

        tracker
            .announce(&request(info_hash, b"peer-1", 6881, 0, "stopped"), ip)
            .await;
        assert_eq!(tracker.swarm_size(info_hash).await, 0);

        // Unknown peer stop is a no-op, not an error.
        let outcome = tracker
            .announce(&request(info_hash, b"ghost", 9999, 0, "stopped"), ip)
            .await;
        assert_eq!(outcome.complete + outcome.incomplete, 0);
    }

    #[tokio::test]
    async fn loopback_rewrite_applies_only_when_configured() {
        let bare = Tracker::new(None);
        let loopback: IpAddr = "127.0.0.1".parse().expect("ip");
        assert_eq!(bare.effective_ip(loopback), loopback);

        let public: IpAddr = "203.0.113.10".parse().expect("ip");
        let configured = Tracker::new(Some(public));
        assert_eq!(configured.effective_ip(loopback), public);
        let remote: IpAddr = "198.51.100.7".parse().expect("ip");
        assert_eq!(configured.effective_ip(remote), remote);
    }

    #[tokio::test]
    async fn register_seeder_inserts_public_and_loopback_twin() {
        let public: IpAddr = "203.0.113.10".parse().expect("ip");
        let tracker = Tracker::new(Some(public));
        let info_hash = hash(b"swarm-c");
        let peer_id = PeerId::for_seeder(Uuid::new_v4(), &info_hash);
        tracker
            .register_seeder(info_hash, &peer_id, "127.0.0.1".parse().expect("ip"), 6881, 0)
            .await;
        assert_eq!(tracker.swarm_size(info_hash).await, 2);

        let snapshot = tracker.snapshot().await;
        let swarm = &snapshot.swarms[0];
        assert_eq!(swarm.seeders, 2);
        let ips: Vec<IpAddr> = swarm.peers.iter().map(|peer| peer.ip).collect();
        assert!(ips.contains(&public));
        assert!(ips.contains(&"127.0.0.1".parse().expect("ip")));
        for peer in &swarm.peers {
            assert_eq!(peer.peer_id_bytes.len(), 20);
        }
    }

    #[tokio::test]
    async fn repeated_registration_does_not_multiply_peers() {
        let tracker = Tracker::new(None);
        let info_hash = hash(b"swarm-d");
        let peer_id = PeerId::for_seeder(Uuid::new_v4(), &info_hash);
        let ip: IpAddr = "10.1.0.5".parse().expect("ip");
        for _ in 0..3 {
            tracker.register_seeder(info_hash, &peer_id, ip, 6881, 0).await;
        }
        assert_eq!(tracker.swarm_size(info_hash).await, 2);
    }

    #[tokio::test]
    async fn snapshot_totals_span_swarms() {
        let tracker = Tracker::new(None);
        let ip: IpAddr = "10.0.0.9".parse().expect("ip");
        tracker
            .announce(&request(hash(b"one"), b"peer-1", 1000, 0, ""), ip)
            .await;
        tracker
            .announce(&request(hash(b"two"), b"peer-2", 1001, 77, ""), ip)
            .await;
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.swarms.len(), 2);
        assert_eq!(snapshot.total_seeders, 1);
        assert_eq!(snapshot.total_leechers, 1);
    }
}

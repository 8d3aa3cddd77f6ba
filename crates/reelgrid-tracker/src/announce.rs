//! Announce query parsing and bencoded response encoding.

use std::net::IpAddr;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use reelgrid_bencode::Writer;
use reelgrid_torrent_core::InfoHash;

use crate::swarm::AnnounceOutcome;

/// Validation failures; each maps to a bencoded `failure reason`.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum AnnounceError {
    /// `info_hash` missing or not 20 bytes after unescaping.
    #[error("invalid info_hash")]
    InvalidInfoHash,
    /// `peer_id` missing or empty.
    #[error("invalid peer_id")]
    InvalidPeerId,
    /// `port` missing or outside 1..=65535.
    #[error("invalid port")]
    InvalidPort,
}

/// One parsed and validated announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Raw peer identifier bytes.
    pub peer_id: Vec<u8>,
    /// Advertised listen port.
    pub port: u16,
    /// Cumulative uploaded bytes.
    pub uploaded: i64,
    /// Cumulative downloaded bytes.
    pub downloaded: i64,
    /// Bytes left; zero marks a seeder.
    pub left: i64,
    /// Event parameter (`started`, `stopped`, `completed`, or empty).
    pub event: String,
    /// Whether the peer list should use the compact encoding.
    pub compact: bool,
}

impl AnnounceRequest {
    /// Parse the raw query string of an announce URL.
    ///
    /// The query is split by hand because `info_hash` and `peer_id` are
    /// percent-encoded binary, not UTF-8; a typed query extractor would
    /// mangle them.
    pub(crate) fn from_query(raw: &str) -> Result<Self, AnnounceError> {
        let mut info_hash_bytes: Option<Vec<u8>> = None;
        let mut peer_id: Option<Vec<u8>> = None;
        let mut port: Option<u16> = None;
        let mut uploaded = 0i64;
        let mut downloaded = 0i64;
        let mut left = 0i64;
        let mut event = String::new();
        let mut compact = true;

        for pair in raw.split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                "info_hash" => {
                    info_hash_bytes = Some(percent_decode_str(value).collect());
                }
                "peer_id" => {
                    peer_id = Some(percent_decode_str(value).collect());
                }
                "port" => {
                    port = decoded_text(value).parse().ok();
                }
                "uploaded" => {
                    uploaded = decoded_text(value).parse().unwrap_or(0);
                }
                "downloaded" => {
                    downloaded = decoded_text(value).parse().unwrap_or(0);
                }
                "left" => {
                    left = decoded_text(value).parse().unwrap_or(0);
                }
                "event" => {
                    event = decoded_text(value);
                }
                "compact" => {
                    compact = decoded_text(value) != "0";
                }
                _ => {}
            }
        }

        let info_hash_bytes = info_hash_bytes.ok_or(AnnounceError::InvalidInfoHash)?;
        if info_hash_bytes.len() != 20 {
            return Err(AnnounceError::InvalidInfoHash);
        }
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&info_hash_bytes);

        let peer_id = peer_id.filter(|id| !id.is_empty()).ok_or(AnnounceError::InvalidPeerId)?;
        let port = port.filter(|p| *p >= 1).ok_or(AnnounceError::InvalidPort)?;

        Ok(Self {
            info_hash: InfoHash::from_bytes(digest),
            peer_id,
            port,
            uploaded,
            downloaded,
            left,
            event,
            compact,
        })
    }
}

fn decoded_text(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Encode a successful announce response.
pub(crate) fn encode_response(outcome: &AnnounceOutcome, compact: bool) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.dict(|dict| {
        dict.entry("complete", |w| w.integer(i64::from(outcome.complete)));
        dict.entry("incomplete", |w| w.integer(i64::from(outcome.incomplete)));
        dict.entry("interval", |w| w.integer(i64::from(outcome.interval)));
        dict.entry("peers", |w| {
            if compact {
                w.bytes(&compact_peers(outcome));
            } else {
                w.list(|list| {
                    for peer in &outcome.peers {
                        list.dict(|entry| {
                            entry.entry("ip", |v| v.text(&peer.ip.to_string()));
                            entry.entry("peer id", |v| v.bytes(&peer.peer_id_bytes));
                            entry.entry("port", |v| v.integer(i64::from(peer.port)));
                        });
                    }
                });
            }
        });
    });
    writer.finish()
}

/// Encode a failure as a bencoded `failure reason` dictionary.
pub(crate) fn encode_failure(reason: &str) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.dict(|dict| {
        dict.entry("failure reason", |w| w.text(reason));
    });
    writer.finish()
}

/// 6-byte IPv4+port entries. IPv6 peers are skipped, except loopback which is
/// folded to `127.0.0.1` for local testing.
fn compact_peers(outcome: &AnnounceOutcome) -> Vec<u8> {
    let mut blob = Vec::with_capacity(outcome.peers.len() * 6);
    for peer in &outcome.peers {
        let octets = match peer.ip {
            IpAddr::V4(v4) => v4.octets(),
            IpAddr::V6(v6) if v6.is_loopback() => [127, 0, 0, 1],
            IpAddr::V6(_) => continue,
        };
        blob.extend_from_slice(&octets);
        blob.extend_from_slice(&peer.port.to_be_bytes());
    }
    blob
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::PeerEntry;
    use chrono::Utc;

    fn encoded_hash() -> (String, InfoHash) {
        let digest = [0x0Au8; 20];
        let encoded: String = digest.iter().map(|b| format!("%{b:02x}")).collect();
        (encoded, InfoHash::from_bytes(digest))
    }

    #[test]
    fn parses_binary_info_hash_and_counters() {
        let (encoded, expected) = encoded_hash();
        let query = format!(
            "info_hash={encoded}&peer_id=-OC0001-abcdefgh0123&port=6881&uploaded=10&downloaded=20&left=30&event=started&compact=1"
        );
        let request = AnnounceRequest::from_query(&query).expect("parse");
        assert_eq!(request.info_hash, expected);
        assert_eq!(request.peer_id, b"-OC0001-abcdefgh0123".to_vec());
        assert_eq!(request.port, 6881);
        assert_eq!(request.uploaded, 10);
        assert_eq!(request.downloaded, 20);
        assert_eq!(request.left, 30);
        assert_eq!(request.event, "started");
        assert!(request.compact);
    }

    #[test]
    fn short_info_hash_rejected() {
        let query = "info_hash=%0a%0b&peer_id=x&port=6881";
        assert_eq!(
            AnnounceRequest::from_query(query).expect_err("short hash"),
            AnnounceError::InvalidInfoHash
        );
    }

    #[test]
    fn missing_peer_id_rejected() {
        let (encoded, _) = encoded_hash();
        let query = format!("info_hash={encoded}&port=6881");
        assert_eq!(
            AnnounceRequest::from_query(&query).expect_err("no peer id"),
            AnnounceError::InvalidPeerId
        );
    }

    #[test]
    fn zero_port_rejected() {
        let (encoded, _) = encoded_hash();
        let query = format!("info_hash={encoded}&peer_id=x&port=0");
        assert_eq!(
            AnnounceRequest::from_query(&query).expect_err("port zero"),
            AnnounceError::InvalidPort
        );
    }

    #[test]
    fn compact_defaults_on_and_zero_disables() {
        let (encoded, _) = encoded_hash();
        let base = format!("info_hash={encoded}&peer_id=x&port=1");
        assert!(AnnounceRequest::from_query(&base).expect("parse").compact);
        let off = format!("{base}&compact=0");
        assert!(!AnnounceRequest::from_query(&off).expect("parse").compact);
    }

    fn entry(ip: &str, port: u16) -> PeerEntry {
        PeerEntry {
            peer_id: "peer".into(),
            peer_id_bytes: b"peer".to_vec(),
            ip: ip.parse().expect("ip"),
            port,
            left: 0,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn compact_encoding_packs_six_bytes_per_peer() {
        let outcome = AnnounceOutcome {
            interval: 60,
            complete: 2,
            incomplete: 0,
            peers: vec![entry("10.0.0.1", 6881), entry("203.0.113.9", 80)],
        };
        let payload = encode_response(&outcome, true);
        let expected_peers = [10, 0, 0, 1, 0x1A, 0xE1, 203, 0, 113, 9, 0, 80];
        let expected_prefix =
            b"d8:completei2e10:incompletei0e8:intervali60e5:peers12:".to_vec();
        assert!(payload.starts_with(&expected_prefix));
        assert_eq!(&payload[expected_prefix.len()..payload.len() - 1], expected_peers);
    }

    #[test]
    fn compact_encoding_folds_loopback_v6_and_skips_global_v6() {
        let outcome = AnnounceOutcome {
            interval: 60,
            complete: 0,
            incomplete: 2,
            peers: vec![entry("::1", 6881), entry("2001:db8::1", 6882)],
        };
        let payload = encode_response(&outcome, true);
        assert!(
            String::from_utf8_lossy(&payload).contains("5:peers6:"),
            "only the folded loopback peer should remain"
        );
    }

    #[test]
    fn dict_encoding_lists_peer_dicts() {
        let outcome = AnnounceOutcome {
            interval: 60,
            complete: 1,
            incomplete: 0,
            peers: vec![entry("10.0.0.1", 6881)],
        };
        let payload = encode_response(&outcome, false);
        let text = String::from_utf8_lossy(&payload);
        assert!(text.contains("5:peersl"));
        assert!(text.contains("2:ip8:10.0.0.1"));
        assert!(text.contains("7:peer id4:peer"));
        assert!(text.contains("4:porti6881e"));
    }

    #[test]
    fn failure_reason_is_bencoded() {
        assert_eq!(
            encode_failure("invalid info_hash"),
            b"d14:failure reason17:invalid info_hashe".to_vec()
        );
    }
}

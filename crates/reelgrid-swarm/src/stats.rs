//! Throughput and ETA measurement.
//!
//! Two independent samplers observe the same cumulative engine counters: the
//! download monitor owns one, the status reporter owns the other with an EMA
//! for ETA smoothing. They must never share state; the reporter touching the
//! monitor's previous sample would corrupt the monitor's rates.

use std::time::Instant;

use uuid::Uuid;

use reelgrid_torrent_core::InfoHash;

/// Smoothing factor applied to the reporter's ETA.
pub(crate) const ETA_EMA_ALPHA: f64 = 0.3;

/// Point-in-time stats for one active torrent.
#[derive(Debug, Clone)]
pub struct TorrentStats {
    /// Swarm identifier.
    pub info_hash: InfoHash,
    /// Torrent row identifier.
    pub torrent_id: Uuid,
    /// Package identifier.
    pub package_id: Uuid,
    /// Transfer this torrent serves, when downloading.
    pub transfer_id: Option<Uuid>,
    /// Package path on this node.
    pub local_path: String,
    /// Completion percentage from 0 to 100.
    pub progress_percent: f64,
    /// Verified payload bytes.
    pub downloaded_bytes: u64,
    /// Total payload bytes.
    pub total_bytes: u64,
    /// Instantaneous download rate.
    pub download_speed_bps: u64,
    /// Instantaneous upload rate.
    pub upload_speed_bps: u64,
    /// Connected peers.
    pub peers_connected: u32,
    /// Completion estimate in seconds, when a rate exists.
    pub eta_seconds: Option<u64>,
    /// Role flag: seeding.
    pub is_seeding: bool,
    /// Role flag: downloading.
    pub is_downloading: bool,
    /// Role flag: fatally errored.
    pub is_errored: bool,
    /// Failure description for errored torrents.
    pub error_message: Option<String>,
}

/// One cumulative counter observation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpeedSample {
    pub(crate) bytes_read: u64,
    pub(crate) bytes_written: u64,
    pub(crate) taken_at: Instant,
}

impl SpeedSample {
    pub(crate) fn now(bytes_read: u64, bytes_written: u64) -> Self {
        Self {
            bytes_read,
            bytes_written,
            taken_at: Instant::now(),
        }
    }

    /// Rates against a newer observation: `(download_bps, upload_bps)`.
    ///
    /// Downloads materialise as data written to disk; uploads as data read
    /// back off it.
    pub(crate) fn rates_to(&self, next: &Self) -> (u64, u64) {
        let elapsed = next.taken_at.duration_since(self.taken_at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return (0, 0);
        }
        let written_delta = next.bytes_written.saturating_sub(self.bytes_written);
        let read_delta = next.bytes_read.saturating_sub(self.bytes_read);
        (
            per_second(written_delta, elapsed),
            per_second(read_delta, elapsed),
        )
    }
}

fn per_second(delta: u64, elapsed: f64) -> u64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        ((delta as f64) / elapsed).round() as u64
    }
}

/// Reporter-side state: previous sample plus the smoothed ETA.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReporterSample {
    pub(crate) prev: SpeedSample,
    pub(crate) eta_ema: Option<f64>,
}

impl ReporterSample {
    /// Fold a fresh raw ETA into the EMA and return the smoothed value.
    pub(crate) fn smooth_eta(&mut self, raw_eta: Option<f64>) -> Option<u64> {
        match raw_eta {
            Some(raw) => {
                let folded = match self.eta_ema {
                    Some(previous) => ETA_EMA_ALPHA * raw + (1.0 - ETA_EMA_ALPHA) * previous,
                    None => raw,
                };
                self.eta_ema = Some(folded);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Some(folded.round() as u64)
            }
            None => {
                self.eta_ema = None;
                None
            }
        }
    }
}

/// Raw ETA from remaining bytes and a rate.
pub(crate) fn eta_seconds(remaining: u64, rate_bps: u64) -> Option<f64> {
    if rate_bps == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(remaining as f64 / rate_bps as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_at(bytes_read: u64, bytes_written: u64, offset: Duration) -> SpeedSample {
        SpeedSample {
            bytes_read,
            bytes_written,
            taken_at: Instant::now() + offset,
        }
    }

    #[test]
    fn rates_divide_delta_by_elapsed() {
        let first = sample_at(0, 0, Duration::ZERO);
        let second = sample_at(1_000_000, 2_000_000, Duration::from_secs(2));
        let (download, upload) = first.rates_to(&second);
        assert_eq!(download, 1_000_000);
        assert_eq!(upload, 500_000);
    }

    #[test]
    fn zero_elapsed_yields_zero_rates() {
        let sample = sample_at(10, 10, Duration::ZERO);
        assert_eq!(sample.rates_to(&sample), (0, 0));
    }

    #[test]
    fn counter_resets_do_not_underflow() {
        let first = sample_at(5_000, 5_000, Duration::ZERO);
        let second = sample_at(100, 100, Duration::from_secs(1));
        assert_eq!(first.rates_to(&second), (0, 0));
    }

    #[test]
    fn eta_requires_a_rate() {
        assert!(eta_seconds(1_000, 0).is_none());
        let eta = eta_seconds(1_000, 100).expect("eta");
        assert!((eta - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_smooths_with_alpha_point_three() {
        let mut reporter = ReporterSample {
            prev: SpeedSample::now(0, 0),
            eta_ema: None,
        };
        assert_eq!(reporter.smooth_eta(Some(100.0)), Some(100));
        // 0.3 * 200 + 0.7 * 100 = 130
        assert_eq!(reporter.smooth_eta(Some(200.0)), Some(130));
        // Losing the rate clears the EMA so a stale estimate cannot linger.
        assert_eq!(reporter.smooth_eta(None), None);
        assert_eq!(reporter.smooth_eta(Some(50.0)), Some(50));
    }
}

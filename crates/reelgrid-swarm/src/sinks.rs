//! Callback seams the orchestrator plugs into the swarm client.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::stats::TorrentStats;

/// Receives download progress from the monitor.
///
/// On the main node the sink writes the transfer row directly; on client
/// nodes it issues the progress `PUT` to main.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Periodic progress for an in-flight transfer.
    async fn report_progress(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()>;

    /// The transfer reached 100% and the torrent flipped to seeding.
    async fn transfer_completed(&self, transfer_id: Uuid, stats: &TorrentStats) -> Result<()>;
}

/// Publishes fatal disk errors onto the owning transfer row.
#[async_trait]
pub trait TransferErrorReporter: Send + Sync {
    /// Record a fatal error for a transfer.
    async fn report_error(&self, transfer_id: Uuid, status: &str, message: &str) -> Result<()>;
}

/// No-op sink for torrents without an attached transfer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn report_progress(&self, _transfer_id: Uuid, _stats: &TorrentStats) -> Result<()> {
        Ok(())
    }

    async fn transfer_completed(&self, _transfer_id: Uuid, _stats: &TorrentStats) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TransferErrorReporter for NullSink {
    async fn report_error(&self, _transfer_id: Uuid, _status: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

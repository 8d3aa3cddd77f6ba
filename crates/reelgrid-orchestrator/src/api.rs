//! Control-plane client used by client nodes to reach main.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use reelgrid_torrent_core::{
    CommandAck, ContentCommand, InfoHash, PendingTransfer, SeederRegistration,
    TorrentStatusReport, TransferCommand, TransferProgressUpdate,
};

/// The main node's control surface as consumed by the core.
#[async_trait]
pub trait MainApi: Send + Sync {
    /// `GET /servers/{id}/pending-transfers`.
    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>>;

    /// `GET /torrents/{info_hash}/file`.
    async fn torrent_file(&self, info_hash: &InfoHash) -> Result<Vec<u8>>;

    /// `PUT /transfers/{id}`.
    async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()>;

    /// `POST /torrents/{info_hash}/seeders`.
    async fn register_seeder(
        &self,
        info_hash: &InfoHash,
        registration: &SeederRegistration,
    ) -> Result<()>;

    /// `POST /servers/{id}/torrent-status`.
    async fn post_status_report(
        &self,
        server_id: Uuid,
        report: &TorrentStatusReport,
    ) -> Result<()>;

    /// `GET /servers/{id}/transfer-commands`.
    async fn transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>>;

    /// `GET /servers/{id}/content-commands`.
    async fn content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>>;

    /// `POST /servers/{id}/transfer-command-ack`.
    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()>;

    /// `POST /servers/{id}/content-command-ack`.
    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()>;
}

/// HTTP implementation with per-request timeouts.
pub struct HttpMainApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpMainApi {
    /// Build a client against the main node's base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build main api client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl MainApi for HttpMainApi {
    async fn pending_transfers(&self, server_id: Uuid) -> Result<Vec<PendingTransfer>> {
        self.http
            .get(self.url(&format!("/servers/{server_id}/pending-transfers")))
            .send()
            .await
            .context("pending-transfers request failed")?
            .error_for_status()
            .context("pending-transfers returned an error status")?
            .json()
            .await
            .context("pending-transfers response was not valid JSON")
    }

    async fn torrent_file(&self, info_hash: &InfoHash) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(self.url(&format!("/torrents/{info_hash}/file")))
            .send()
            .await
            .context("torrent-file request failed")?
            .error_for_status()
            .context("torrent-file returned an error status")?
            .bytes()
            .await
            .context("torrent-file body read failed")?;
        Ok(bytes.to_vec())
    }

    async fn update_transfer(
        &self,
        transfer_id: Uuid,
        update: &TransferProgressUpdate,
    ) -> Result<()> {
        self.http
            .put(self.url(&format!("/transfers/{transfer_id}")))
            .json(update)
            .send()
            .await
            .context("transfer update request failed")?
            .error_for_status()
            .context("transfer update returned an error status")?;
        Ok(())
    }

    async fn register_seeder(
        &self,
        info_hash: &InfoHash,
        registration: &SeederRegistration,
    ) -> Result<()> {
        self.http
            .post(self.url(&format!("/torrents/{info_hash}/seeders")))
            .json(registration)
            .send()
            .await
            .context("seeder registration request failed")?
            .error_for_status()
            .context("seeder registration returned an error status")?;
        Ok(())
    }

    async fn post_status_report(
        &self,
        server_id: Uuid,
        report: &TorrentStatusReport,
    ) -> Result<()> {
        self.http
            .post(self.url(&format!("/servers/{server_id}/torrent-status")))
            .json(report)
            .send()
            .await
            .context("status report request failed")?
            .error_for_status()
            .context("status report returned an error status")?;
        Ok(())
    }

    async fn transfer_commands(&self, server_id: Uuid) -> Result<Vec<TransferCommand>> {
        self.http
            .get(self.url(&format!("/servers/{server_id}/transfer-commands")))
            .send()
            .await
            .context("transfer-commands request failed")?
            .error_for_status()
            .context("transfer-commands returned an error status")?
            .json()
            .await
            .context("transfer-commands response was not valid JSON")
    }

    async fn content_commands(&self, server_id: Uuid) -> Result<Vec<ContentCommand>> {
        self.http
            .get(self.url(&format!("/servers/{server_id}/content-commands")))
            .send()
            .await
            .context("content-commands request failed")?
            .error_for_status()
            .context("content-commands returned an error status")?
            .json()
            .await
            .context("content-commands response was not valid JSON")
    }

    async fn ack_transfer_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.http
            .post(self.url(&format!("/servers/{server_id}/transfer-command-ack")))
            .json(ack)
            .send()
            .await
            .context("transfer-command ack failed")?
            .error_for_status()
            .context("transfer-command ack returned an error status")?;
        Ok(())
    }

    async fn ack_content_command(&self, server_id: Uuid, ack: &CommandAck) -> Result<()> {
        self.http
            .post(self.url(&format!("/servers/{server_id}/content-command-ack")))
            .json(ack)
            .send()
            .await
            .context("content-command ack failed")?
            .error_for_status()
            .context("content-command ack returned an error status")?;
        Ok(())
    }
}

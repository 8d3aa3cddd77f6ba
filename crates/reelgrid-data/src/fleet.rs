//! Fleet registry, seeder liveness, status ingestion, and the announce log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use reelgrid_torrent_core::store::{AnnounceAttempt, AnnounceLog, SeederStore, ServerStore};
use reelgrid_torrent_core::{ServerRow, TorrentStatusReport};

use crate::store::MetaStore;

/// Seeder rows older than this are suppressed from peer-facing counts.
const SEEDER_STALE_MINUTES: i32 = 10;

#[async_trait]
impl SeederStore for MetaStore {
    async fn upsert_seeder(
        &self,
        torrent_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO seeders (torrent_id, server_id, local_path, last_announce)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (torrent_id, server_id)
             DO UPDATE SET local_path = EXCLUDED.local_path, last_announce = now()",
        )
        .bind(torrent_id)
        .bind(server_id)
        .bind(local_path)
        .execute(self.pool())
        .await
        .context("failed to upsert seeder row")?;
        Ok(())
    }

    async fn remove_seeder(&self, torrent_id: Uuid, server_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM seeders WHERE torrent_id = $1 AND server_id = $2")
            .bind(torrent_id)
            .bind(server_id)
            .execute(self.pool())
            .await
            .context("failed to remove seeder row")?;
        Ok(())
    }

    async fn seeder_count(&self, torrent_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM seeders
             WHERE torrent_id = $1
               AND last_announce > now() - make_interval(mins => $2)",
        )
        .bind(torrent_id)
        .bind(SEEDER_STALE_MINUTES)
        .fetch_one(self.pool())
        .await
        .context("failed to count live seeders")?;
        Ok(count)
    }
}

#[async_trait]
impl ServerStore for MetaStore {
    async fn upsert_server(&self, row: &ServerRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO servers (id, name, mode, base_url, last_seen)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (id)
             DO UPDATE SET name = EXCLUDED.name,
                           mode = EXCLUDED.mode,
                           base_url = EXCLUDED.base_url,
                           last_seen = now()",
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(row.mode.as_str())
        .bind(row.base_url.as_deref())
        .execute(self.pool())
        .await
        .context("failed to upsert server row")?;
        Ok(())
    }

    async fn server(&self, server_id: Uuid) -> Result<Option<ServerRow>> {
        let row: Option<(Uuid, String, String, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT id, name, mode, base_url, last_seen FROM servers WHERE id = $1",
            )
            .bind(server_id)
            .fetch_optional(self.pool())
            .await
            .context("failed to load server row")?;
        row.map(|(id, name, mode, base_url, last_seen)| {
            Ok(ServerRow {
                id,
                name,
                mode: mode.parse()?,
                base_url,
                last_seen,
            })
        })
        .transpose()
    }

    async fn record_server_torrent_status(
        &self,
        server_id: Uuid,
        torrent_id: Uuid,
        status: &str,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO server_torrent_status (server_id, torrent_id, status, message)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (server_id, torrent_id)
             DO UPDATE SET status = EXCLUDED.status,
                           message = EXCLUDED.message,
                           updated_at = now()",
        )
        .bind(server_id)
        .bind(torrent_id)
        .bind(status)
        .bind(message)
        .execute(self.pool())
        .await
        .context("failed to record server torrent status")?;
        Ok(())
    }

    async fn create_ingestion_tracking(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingestion_tracking (package_id, server_id, local_path)
             VALUES ($1, $2, $3)",
        )
        .bind(package_id)
        .bind(server_id)
        .bind(local_path)
        .execute(self.pool())
        .await
        .context("failed to create ingestion tracking row")?;
        Ok(())
    }

    async fn ingest_status_report(&self, report: &TorrentStatusReport) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to open report transaction")?;

        if report.is_full_sync {
            // First report after a node boot: stale rows from the previous
            // process generation are meaningless, replace wholesale.
            sqlx::query("DELETE FROM server_torrent_status WHERE server_id = $1")
                .bind(report.server_id)
                .execute(&mut *tx)
                .await
                .context("failed to reconcile stale status rows")?;
        }

        for entry in &report.torrents {
            let Some(torrent_id) = entry.torrent_id else {
                continue;
            };
            sqlx::query(
                "INSERT INTO server_torrent_status (server_id, torrent_id, status, message)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (server_id, torrent_id)
                 DO UPDATE SET status = EXCLUDED.status,
                               message = EXCLUDED.message,
                               updated_at = now()",
            )
            .bind(report.server_id)
            .bind(torrent_id)
            .bind(&entry.status)
            .bind(entry.error_message.as_deref())
            .execute(&mut *tx)
            .await
            .context("failed to ingest status entry")?;
        }

        sqlx::query("UPDATE servers SET last_seen = now() WHERE id = $1")
            .bind(report.server_id)
            .execute(&mut *tx)
            .await
            .context("failed to refresh server liveness")?;

        tx.commit()
            .await
            .context("failed to commit report transaction")?;
        Ok(())
    }
}

#[async_trait]
impl AnnounceLog for MetaStore {
    async fn record_announce(&self, attempt: &AnnounceAttempt) -> Result<()> {
        let outcome = sqlx::query(
            "INSERT INTO announce_attempts
                 (info_hash, peer_id, source_ip, port, event, accepted,
                  failure_reason, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(attempt.info_hash.as_deref())
        .bind(attempt.peer_id.as_deref())
        .bind(&attempt.source_ip)
        .bind(attempt.port.map(i32::from))
        .bind(&attempt.event)
        .bind(attempt.accepted)
        .bind(attempt.failure_reason.as_deref())
        .bind(attempt.received_at)
        .execute(self.pool())
        .await;

        // The audit log is best-effort; an unreachable store must never break
        // the announce path.
        if let Err(err) = outcome {
            warn!(error = %err, "failed to record announce attempt");
        }
        Ok(())
    }
}

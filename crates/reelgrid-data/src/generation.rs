//! Queue, checkpoint, and generation-progress persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use reelgrid_torrent_core::store::{CheckpointStore, GenerationStatusStore, QueueStore};
use reelgrid_torrent_core::{
    GenerationProgress, PieceCheckpoint, QueueItem, QueueStatus, QueueStatusEntry,
};

use crate::store::MetaStore;

#[derive(Debug, FromRow)]
struct QueueRow {
    id: Uuid,
    package_id: Uuid,
    server_id: Uuid,
    status: String,
    cancelled: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem> {
        Ok(QueueItem {
            id: self.id,
            package_id: self.package_id,
            server_id: self.server_id,
            status: self.status.parse()?,
            cancelled: self.cancelled,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for MetaStore {
    async fn load_checkpoints(
        &self,
        package_id: Uuid,
        server_id: Uuid,
    ) -> Result<Vec<PieceCheckpoint>> {
        let rows: Vec<(i32, Vec<u8>)> = sqlx::query_as(
            "SELECT piece_index, hash FROM torrent_checkpoints
             WHERE package_id = $1 AND server_id = $2
             ORDER BY piece_index",
        )
        .bind(package_id)
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load checkpoints")?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for (index, hash) in rows {
            let mut digest = [0u8; 20];
            if hash.len() == 20 {
                digest.copy_from_slice(&hash);
            }
            checkpoints.push(PieceCheckpoint {
                piece_index: u32::try_from(index).unwrap_or_default(),
                hash: digest,
            });
        }
        Ok(checkpoints)
    }

    async fn save_checkpoint_batch(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        batch: &[PieceCheckpoint],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let indexes: Vec<i32> = batch
            .iter()
            .map(|cp| i32::try_from(cp.piece_index).unwrap_or(i32::MAX))
            .collect();
        let hashes: Vec<Vec<u8>> = batch.iter().map(|cp| cp.hash.to_vec()).collect();
        sqlx::query(
            "INSERT INTO torrent_checkpoints (package_id, server_id, piece_index, hash)
             SELECT $1::uuid, $2::uuid, idx, digest
             FROM UNNEST($3::int4[], $4::bytea[]) AS batch(idx, digest)
             ON CONFLICT (package_id, server_id, piece_index)
             DO UPDATE SET hash = EXCLUDED.hash",
        )
        .bind(package_id)
        .bind(server_id)
        .bind(&indexes)
        .bind(&hashes)
        .execute(self.pool())
        .await
        .context("failed to save checkpoint batch")?;
        debug!(
            package_id = %package_id,
            pieces = batch.len(),
            "checkpoint batch flushed"
        );
        Ok(())
    }

    async fn clear_checkpoints(&self, package_id: Uuid, server_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM torrent_checkpoints WHERE package_id = $1 AND server_id = $2",
        )
        .bind(package_id)
        .bind(server_id)
        .execute(self.pool())
        .await
        .context("failed to clear checkpoints")?;
        Ok(())
    }
}

#[async_trait]
impl GenerationStatusStore for MetaStore {
    async fn update_generation_progress(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        progress: &GenerationProgress,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_queue
             SET progress_percent = $3,
                 current_file = $4,
                 hashing_speed_bps = $5,
                 updated_at = now()
             WHERE package_id = $1 AND server_id = $2",
        )
        .bind(package_id)
        .bind(server_id)
        .bind(progress.progress_percent)
        .bind(&progress.current_file)
        .bind(i64::try_from(progress.hashing_speed_bps).unwrap_or(i64::MAX))
        .execute(self.pool())
        .await
        .context("failed to update generation progress")?;
        Ok(())
    }

    async fn generation_cancelled(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        let cancelled: Option<(bool,)> = sqlx::query_as(
            "SELECT cancelled FROM torrent_queue WHERE package_id = $1 AND server_id = $2",
        )
        .bind(package_id)
        .bind(server_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to read cancellation flag")?;
        Ok(cancelled.is_some_and(|(flag,)| flag))
    }
}

#[async_trait]
impl QueueStore for MetaStore {
    async fn enqueue(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO torrent_queue (id, package_id, server_id, status)
             VALUES (gen_random_uuid(), $1, $2, 'queued')
             ON CONFLICT (package_id, server_id) DO NOTHING",
        )
        .bind(package_id)
        .bind(server_id)
        .execute(self.pool())
        .await
        .context("failed to enqueue generation task")?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_queued(&self, server_id: Uuid) -> Result<Option<QueueItem>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT q.id, q.package_id, q.server_id, q.status, q.cancelled,
                    q.error_message, q.created_at
             FROM torrent_queue q
             JOIN package_inventory i
               ON i.package_id = q.package_id AND i.server_id = q.server_id
             WHERE q.server_id = $1 AND q.status = 'queued'
             ORDER BY q.created_at
             LIMIT 1",
        )
        .bind(server_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to pick next queued item")?;
        row.map(QueueRow::into_item).transpose()
    }

    async fn other_node_generating(&self, package_id: Uuid, server_id: Uuid) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM torrent_queue
                 WHERE package_id = $1 AND server_id <> $2 AND status = 'generating'
             )",
        )
        .bind(package_id)
        .bind(server_id)
        .fetch_one(self.pool())
        .await
        .context("failed to check fleet generation state")?;
        Ok(exists)
    }

    async fn mark_generating(&self, queue_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_queue
             SET status = 'generating', updated_at = now()
             WHERE id = $1",
        )
        .bind(queue_id)
        .execute(self.pool())
        .await
        .context("failed to mark queue item generating")?;
        Ok(())
    }

    async fn finish(
        &self,
        queue_id: Uuid,
        status: QueueStatus,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_queue
             SET status = $2, error_message = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(queue_id)
        .bind(status.as_str())
        .bind(message)
        .execute(self.pool())
        .await
        .context("failed to finish queue item")?;
        Ok(())
    }

    async fn delete_item(&self, queue_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM torrent_queue WHERE id = $1")
            .bind(queue_id)
            .execute(self.pool())
            .await
            .context("failed to delete queue item")?;
        Ok(())
    }

    async fn request_cancel(&self, queue_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE torrent_queue SET cancelled = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(queue_id)
        .execute(self.pool())
        .await
        .context("failed to request queue cancellation")?;
        Ok(())
    }

    async fn delete_completed_rows(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM torrent_queue WHERE status = 'completed'")
            .execute(self.pool())
            .await
            .context("failed to cull completed queue rows")?;
        Ok(result.rows_affected())
    }

    async fn reset_own_rows(&self, server_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE torrent_queue
             SET status = 'queued', cancelled = FALSE, updated_at = now()
             WHERE server_id = $1 AND status IN ('generating', 'failed')",
        )
        .bind(server_id)
        .execute(self.pool())
        .await
        .context("failed to reset own queue rows")?;
        Ok(result.rows_affected())
    }

    async fn reclaim_orphaned_rows(&self, server_id: Uuid) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("failed to open reclaim transaction")?;

        // De-duplicate foreign generating rows, keeping the oldest per package.
        sqlx::query(
            "DELETE FROM torrent_queue stale
             WHERE stale.status = 'generating' AND stale.server_id <> $1
               AND EXISTS (
                   SELECT 1 FROM torrent_queue keep
                   WHERE keep.package_id = stale.package_id
                     AND keep.status = 'generating'
                     AND keep.server_id <> $1
                     AND (keep.created_at < stale.created_at
                          OR (keep.created_at = stale.created_at AND keep.id < stale.id))
               )",
        )
        .bind(server_id)
        .execute(&mut *tx)
        .await
        .context("failed to de-duplicate foreign generating rows")?;

        let reclaimed = sqlx::query(
            "UPDATE torrent_queue
             SET server_id = $1, status = 'queued', cancelled = FALSE, updated_at = now()
             WHERE status = 'generating' AND server_id <> $1
               AND NOT EXISTS (
                   SELECT 1 FROM torrent_queue mine
                   WHERE mine.package_id = torrent_queue.package_id
                     AND mine.server_id = $1
               )",
        )
        .bind(server_id)
        .execute(&mut *tx)
        .await
        .context("failed to reclaim orphaned generating rows")?;

        // Rows that could not move because this node already queues the same
        // package are redundant claims; drop them.
        sqlx::query(
            "DELETE FROM torrent_queue WHERE status = 'generating' AND server_id <> $1",
        )
        .bind(server_id)
        .execute(&mut *tx)
        .await
        .context("failed to drop unreclaimable generating rows")?;

        tx.commit()
            .await
            .context("failed to commit reclaim transaction")?;
        Ok(reclaimed.rows_affected())
    }

    async fn active_entries(&self, server_id: Uuid) -> Result<Vec<QueueStatusEntry>> {
        let rows: Vec<(Uuid, String, f64, i64, String)> = sqlx::query_as(
            "SELECT package_id, status, progress_percent, hashing_speed_bps, current_file
             FROM torrent_queue
             WHERE server_id = $1 AND status IN ('queued', 'generating')
             ORDER BY created_at",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to load active queue entries")?;
        Ok(rows
            .into_iter()
            .map(
                |(package_id, status, progress_percent, hashing_speed_bps, current_file)| {
                    QueueStatusEntry {
                        package_id,
                        status,
                        progress_percent,
                        hashing_speed_bps,
                        current_file,
                    }
                },
            )
            .collect())
    }
}

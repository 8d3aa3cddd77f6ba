//! Torrent rows, package inventory, and the piece-completion cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use reelgrid_torrent_core::store::{CompletionStore, TorrentStore};
use reelgrid_torrent_core::{InfoHash, SeedableTorrent, TorrentRecord};

use crate::store::MetaStore;

#[derive(Debug, FromRow)]
struct TorrentRow {
    id: Uuid,
    package_id: Uuid,
    info_hash: String,
    piece_size: i64,
    total_pieces: i32,
    file_bytes: Vec<u8>,
    created_by_server: Uuid,
    created_at: DateTime<Utc>,
}

impl TorrentRow {
    fn into_record(self) -> Result<TorrentRecord> {
        Ok(TorrentRecord {
            id: self.id,
            package_id: self.package_id,
            info_hash: self.info_hash.parse()?,
            piece_size: self.piece_size,
            total_pieces: self.total_pieces,
            file_bytes: self.file_bytes,
            created_by_server: self.created_by_server,
            created_at: self.created_at,
        })
    }
}

const SELECT_TORRENT: &str =
    "SELECT id, package_id, info_hash, piece_size, total_pieces, file_bytes,
            created_by_server, created_at
     FROM torrents";

#[async_trait]
impl TorrentStore for MetaStore {
    async fn upsert_package(&self, package: &reelgrid_torrent_core::Package) -> Result<()> {
        sqlx::query(
            "INSERT INTO packages
                 (id, asset_map_uuid, name, title, total_size_bytes, file_count)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (asset_map_uuid) DO NOTHING",
        )
        .bind(package.id)
        .bind(package.asset_map_uuid)
        .bind(&package.name)
        .bind(package.title.as_deref())
        .bind(package.total_size_bytes)
        .bind(package.file_count)
        .execute(self.pool())
        .await
        .context("failed to upsert package row")?;
        Ok(())
    }

    async fn save_torrent(&self, record: &TorrentRecord) -> Result<Uuid> {
        // Idempotent on the info-hash: whichever generation lands first owns
        // the row, and identical re-runs collapse onto it.
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO torrents
                 (id, package_id, info_hash, piece_size, total_pieces, file_bytes,
                  created_by_server, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (info_hash) DO UPDATE SET info_hash = EXCLUDED.info_hash
             RETURNING id",
        )
        .bind(record.id)
        .bind(record.package_id)
        .bind(record.info_hash.to_hex())
        .bind(record.piece_size)
        .bind(record.total_pieces)
        .bind(&record.file_bytes)
        .bind(record.created_by_server)
        .bind(record.created_at)
        .fetch_one(self.pool())
        .await
        .context("failed to save torrent row")?;
        debug!(info_hash = %record.info_hash, torrent_id = %id, "torrent row saved");
        Ok(id)
    }

    async fn torrent_by_info_hash(&self, info_hash: &InfoHash) -> Result<Option<TorrentRecord>> {
        let row: Option<TorrentRow> =
            sqlx::query_as(&format!("{SELECT_TORRENT} WHERE info_hash = $1"))
                .bind(info_hash.to_hex())
                .fetch_optional(self.pool())
                .await
                .context("failed to load torrent by info-hash")?;
        row.map(TorrentRow::into_record).transpose()
    }

    async fn torrent_by_id(&self, torrent_id: Uuid) -> Result<Option<TorrentRecord>> {
        let row: Option<TorrentRow> =
            sqlx::query_as(&format!("{SELECT_TORRENT} WHERE id = $1"))
                .bind(torrent_id)
                .fetch_optional(self.pool())
                .await
                .context("failed to load torrent by id")?;
        row.map(TorrentRow::into_record).transpose()
    }

    async fn torrent_for_package(&self, package_id: Uuid) -> Result<Option<TorrentRecord>> {
        let row: Option<TorrentRow> =
            sqlx::query_as(&format!("{SELECT_TORRENT} WHERE package_id = $1"))
                .bind(package_id)
                .fetch_optional(self.pool())
                .await
                .context("failed to load torrent for package")?;
        row.map(TorrentRow::into_record).transpose()
    }

    async fn seedable_torrents(&self, server_id: Uuid) -> Result<Vec<SeedableTorrent>> {
        let rows: Vec<SeedableRow> = sqlx::query_as(
            "SELECT t.id, t.package_id, t.info_hash, t.piece_size, t.total_pieces,
                    t.file_bytes, t.created_by_server, t.created_at, i.local_path
             FROM torrents t
             JOIN package_inventory i ON i.package_id = t.package_id
             WHERE i.server_id = $1
             ORDER BY t.created_at",
        )
        .bind(server_id)
        .fetch_all(self.pool())
        .await
        .context("failed to join torrents with inventory")?;

        let mut seedable = Vec::with_capacity(rows.len());
        for row in rows {
            let local_path = row.local_path.clone();
            seedable.push(SeedableTorrent {
                torrent: row.torrent().into_record()?,
                local_path,
            });
        }
        Ok(seedable)
    }

    async fn upsert_inventory(
        &self,
        package_id: Uuid,
        server_id: Uuid,
        local_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO package_inventory (package_id, server_id, local_path)
             VALUES ($1, $2, $3)
             ON CONFLICT (package_id, server_id)
             DO UPDATE SET local_path = EXCLUDED.local_path, updated_at = now()",
        )
        .bind(package_id)
        .bind(server_id)
        .bind(local_path)
        .execute(self.pool())
        .await
        .context("failed to upsert inventory row")?;
        Ok(())
    }

    async fn remove_inventory(&self, package_id: Uuid, server_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM package_inventory WHERE package_id = $1 AND server_id = $2",
        )
        .bind(package_id)
        .bind(server_id)
        .execute(self.pool())
        .await
        .context("failed to remove inventory row")?;
        Ok(())
    }

    async fn inventory_path(&self, package_id: Uuid, server_id: Uuid) -> Result<Option<String>> {
        let path: Option<(String,)> = sqlx::query_as(
            "SELECT local_path FROM package_inventory
             WHERE package_id = $1 AND server_id = $2",
        )
        .bind(package_id)
        .bind(server_id)
        .fetch_optional(self.pool())
        .await
        .context("failed to read inventory path")?;
        Ok(path.map(|(local_path,)| local_path))
    }
}

/// Joined row for `seedable_torrents`; sqlx flattens the torrent columns.
#[derive(Debug, FromRow)]
struct SeedableRow {
    id: Uuid,
    package_id: Uuid,
    info_hash: String,
    piece_size: i64,
    total_pieces: i32,
    file_bytes: Vec<u8>,
    created_by_server: Uuid,
    created_at: DateTime<Utc>,
    local_path: String,
}

impl SeedableRow {
    fn torrent(self) -> TorrentRow {
        TorrentRow {
            id: self.id,
            package_id: self.package_id,
            info_hash: self.info_hash,
            piece_size: self.piece_size,
            total_pieces: self.total_pieces,
            file_bytes: self.file_bytes,
            created_by_server: self.created_by_server,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl CompletionStore for MetaStore {
    async fn piece_complete(
        &self,
        info_hash: &InfoHash,
        piece_index: u32,
    ) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT completed FROM piece_completion
             WHERE info_hash = $1 AND piece_index = $2",
        )
        .bind(info_hash.to_hex())
        .bind(i32::try_from(piece_index).unwrap_or(i32::MAX))
        .fetch_optional(self.pool())
        .await
        .context("failed to read piece completion")?;
        Ok(row.map(|(completed,)| completed))
    }

    async fn known_pieces(&self, info_hash: &InfoHash) -> Result<Vec<(u32, bool)>> {
        let rows: Vec<(i32, bool)> = sqlx::query_as(
            "SELECT piece_index, completed FROM piece_completion WHERE info_hash = $1",
        )
        .bind(info_hash.to_hex())
        .fetch_all(self.pool())
        .await
        .context("failed to load completion cache")?;
        Ok(rows
            .into_iter()
            .map(|(index, completed)| (u32::try_from(index).unwrap_or_default(), completed))
            .collect())
    }

    async fn set_piece_complete(
        &self,
        info_hash: &InfoHash,
        piece_index: u32,
        complete: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO piece_completion (info_hash, piece_index, completed)
             VALUES ($1, $2, $3)
             ON CONFLICT (info_hash, piece_index)
             DO UPDATE SET completed = EXCLUDED.completed, updated_at = now()",
        )
        .bind(info_hash.to_hex())
        .bind(i32::try_from(piece_index).unwrap_or(i32::MAX))
        .bind(complete)
        .execute(self.pool())
        .await
        .context("failed to set piece completion")?;
        Ok(())
    }

    async fn mark_all_complete(&self, info_hash: &InfoHash, piece_count: u32) -> Result<()> {
        sqlx::query(
            "INSERT INTO piece_completion (info_hash, piece_index, completed)
             SELECT $1::text, gs, TRUE FROM generate_series(0, $2 - 1) gs
             ON CONFLICT (info_hash, piece_index)
             DO UPDATE SET completed = TRUE, updated_at = now()",
        )
        .bind(info_hash.to_hex())
        .bind(i32::try_from(piece_count).unwrap_or(i32::MAX))
        .execute(self.pool())
        .await
        .context("failed to pre-mark piece completion")?;
        Ok(())
    }

    async fn clear_pieces(&self, info_hash: &InfoHash) -> Result<()> {
        sqlx::query("DELETE FROM piece_completion WHERE info_hash = $1")
            .bind(info_hash.to_hex())
            .execute(self.pool())
            .await
            .context("failed to clear piece completion")?;
        Ok(())
    }

    async fn purge_incomplete_rows(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM piece_completion WHERE completed = FALSE")
            .execute(self.pool())
            .await
            .context("failed to purge incomplete piece rows")?;
        Ok(result.rows_affected())
    }
}

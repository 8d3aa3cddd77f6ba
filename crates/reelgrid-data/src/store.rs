//! Store construction and shared helpers.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database-backed repository shared by every subsystem.
#[derive(Clone)]
pub struct MetaStore {
    pool: PgPool,
}

impl MetaStore {
    /// Connect to the metadata store and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to the metadata store")?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run distribution core migrations")?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//! Settings models.
//!
//! # Design
//! - Pure data carriers; loading and precedence live in `loader`.
//! - Defaults match a single-node deployment so a bare main node starts with
//!   nothing but database credentials.

use serde::Deserialize;

use reelgrid_torrent_core::ServerMode;

use crate::error::ConfigError;

/// Metadata store connection options (`db_*` in the option table).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres host.
    pub host: String,
    /// Postgres port.
    #[serde(default = "defaults::db_port")]
    pub port: u16,
    /// Database name.
    pub name: String,
    /// Role name.
    pub user: String,
    /// Role password.
    pub password: String,
}

impl DatabaseSettings {
    /// Render the sqlx connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Node identity and fleet-role options.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Display name; defaults to the hostname at load time.
    #[serde(default)]
    pub name: Option<String>,
    /// `main` or `client`.
    #[serde(default = "defaults::server_mode")]
    pub server_mode: ServerMode,
    /// Port the main node's control API listens on.
    #[serde(default = "defaults::control_port")]
    pub control_port: u16,
    /// Main-node base URL; required in client mode.
    #[serde(default)]
    pub main_server_url: Option<String>,
    /// Shared secret for client enrollment.
    #[serde(default)]
    pub registration_key: Option<String>,
}

/// Torrent subsystem options.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentSettings {
    /// Local DCP library root scanned for packages.
    #[serde(default = "defaults::scan_path")]
    pub scan_path: String,
    /// Tracker listen port on the main node; 0 disables hosting.
    #[serde(default = "defaults::tracker_port")]
    pub tracker_port: u16,
    /// BitTorrent engine listen port.
    #[serde(default = "defaults::torrent_data_port")]
    pub torrent_data_port: u16,
    /// Download destination root.
    #[serde(default = "defaults::torrent_data_dir")]
    pub torrent_data_dir: String,
    /// Soft cap on concurrently seeded torrents.
    #[serde(default = "defaults::max_concurrent_seeds")]
    pub max_concurrent_seeds: usize,
    /// Soft cap on concurrent downloads.
    #[serde(default = "defaults::max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// Generator worker pool size.
    #[serde(default = "defaults::piece_hash_workers")]
    pub piece_hash_workers: usize,
    /// Announce URL baked into newly generated torrents.
    #[serde(default)]
    pub public_tracker_url: Option<String>,
    /// IP advertised by the tracker when the announcer is loopback.
    #[serde(default)]
    pub public_ip: Option<String>,
}

/// Root settings document.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Metadata store connection.
    pub database: DatabaseSettings,
    /// Node identity and role.
    #[serde(default = "defaults::node")]
    pub node: NodeSettings,
    /// Torrent subsystem options.
    #[serde(default = "defaults::torrent")]
    pub torrent: TorrentSettings,
}

impl Settings {
    /// Validate cross-field constraints after load.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required option is missing or invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database.host",
            });
        }
        if self.database.user.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database.user",
            });
        }
        if self.database.name.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database.name",
            });
        }
        if self.node.server_mode == ServerMode::Client {
            match self.node.main_server_url.as_deref() {
                None | Some("") => {
                    return Err(ConfigError::MissingRequired {
                        field: "node.main_server_url",
                    });
                }
                Some(url) if !url.starts_with("http") => {
                    return Err(ConfigError::InvalidValue {
                        field: "node.main_server_url",
                        reason: "must be an http(s) URL",
                    });
                }
                Some(_) => {}
            }
        }
        if self.torrent.piece_hash_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "torrent.piece_hash_workers",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

pub(crate) mod defaults {
    use super::{NodeSettings, TorrentSettings};
    use reelgrid_torrent_core::ServerMode;

    pub(crate) const fn db_port() -> u16 {
        5432
    }

    pub(crate) const fn server_mode() -> ServerMode {
        ServerMode::Main
    }

    pub(crate) const fn control_port() -> u16 {
        7474
    }

    pub(crate) fn scan_path() -> String {
        "/library".to_string()
    }

    pub(crate) const fn tracker_port() -> u16 {
        6969
    }

    pub(crate) const fn torrent_data_port() -> u16 {
        42069
    }

    pub(crate) fn torrent_data_dir() -> String {
        "/library/incoming".to_string()
    }

    pub(crate) const fn max_concurrent_seeds() -> usize {
        64
    }

    pub(crate) const fn max_concurrent_downloads() -> usize {
        4
    }

    pub(crate) const fn piece_hash_workers() -> usize {
        4
    }

    pub(crate) fn node() -> NodeSettings {
        NodeSettings {
            name: None,
            server_mode: server_mode(),
            control_port: control_port(),
            main_server_url: None,
            registration_key: None,
        }
    }

    pub(crate) fn torrent() -> TorrentSettings {
        TorrentSettings {
            scan_path: scan_path(),
            tracker_port: tracker_port(),
            torrent_data_port: torrent_data_port(),
            torrent_data_dir: torrent_data_dir(),
            max_concurrent_seeds: max_concurrent_seeds(),
            max_concurrent_downloads: max_concurrent_downloads(),
            piece_hash_workers: piece_hash_workers(),
            public_tracker_url: None,
            public_ip: None,
        }
    }
}

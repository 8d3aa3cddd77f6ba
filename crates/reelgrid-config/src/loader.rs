//! Settings loading with environment-over-file precedence.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use reelgrid_torrent_core::ServerMode;

use crate::error::ConfigError;
use crate::model::Settings;

/// Default settings file consulted when `REELGRID_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "/etc/reelgrid/reelgrid.toml";

/// Load settings from the default file location and the process environment.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable/unparsable, an
/// override is malformed, or validation fails.
pub fn load() -> Result<Settings, ConfigError> {
    let path = std::env::var("REELGRID_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let env: HashMap<String, String> = std::env::vars().collect();
    load_from(Path::new(&path), &env)
}

/// Load settings from an explicit file path and environment map.
///
/// The file may be absent (environment-only deployments); environment
/// variables always win over file values.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable/unparsable, an
/// override is malformed, or validation fails.
pub fn load_from(path: &Path, env: &HashMap<String, String>) -> Result<Settings, ConfigError> {
    let mut document = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str::<toml::Table>(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.display().to_string(),
            source,
        })?
    } else {
        debug!(path = %path.display(), "settings file absent, using environment only");
        toml::Table::new()
    };

    apply_env_overrides(&mut document, env)?;

    let settings: Settings =
        document
            .try_into()
            .map_err(|source: toml::de::Error| ConfigError::ParseFile {
                path: path.display().to_string(),
                source,
            })?;
    settings.validate()?;
    Ok(settings)
}

/// `(env var, table, key)` mapping for string-typed options.
const STRING_OVERRIDES: &[(&str, &str, &str)] = &[
    ("REELGRID_DB_HOST", "database", "host"),
    ("REELGRID_DB_NAME", "database", "name"),
    ("REELGRID_DB_USER", "database", "user"),
    ("REELGRID_DB_PASSWORD", "database", "password"),
    ("REELGRID_NODE_NAME", "node", "name"),
    ("REELGRID_MAIN_SERVER_URL", "node", "main_server_url"),
    ("REELGRID_REGISTRATION_KEY", "node", "registration_key"),
    ("REELGRID_SCAN_PATH", "torrent", "scan_path"),
    ("REELGRID_TORRENT_DATA_DIR", "torrent", "torrent_data_dir"),
    ("REELGRID_PUBLIC_TRACKER_URL", "torrent", "public_tracker_url"),
    ("REELGRID_PUBLIC_IP", "torrent", "public_ip"),
];

/// `(env var, table, key)` mapping for integer-typed options.
const INTEGER_OVERRIDES: &[(&str, &str, &str)] = &[
    ("REELGRID_DB_PORT", "database", "port"),
    ("REELGRID_CONTROL_PORT", "node", "control_port"),
    ("REELGRID_TRACKER_PORT", "torrent", "tracker_port"),
    ("REELGRID_TORRENT_DATA_PORT", "torrent", "torrent_data_port"),
    ("REELGRID_MAX_CONCURRENT_SEEDS", "torrent", "max_concurrent_seeds"),
    (
        "REELGRID_MAX_CONCURRENT_DOWNLOADS",
        "torrent",
        "max_concurrent_downloads",
    ),
    ("REELGRID_PIECE_HASH_WORKERS", "torrent", "piece_hash_workers"),
];

fn apply_env_overrides(
    document: &mut toml::Table,
    env: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    for &(name, table, key) in STRING_OVERRIDES {
        if let Some(value) = env.get(name) {
            set_value(document, table, key, toml::Value::String(value.clone()));
        }
    }
    for &(name, table, key) in INTEGER_OVERRIDES {
        if let Some(value) = env.get(name) {
            let parsed: i64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name })?;
            set_value(document, table, key, toml::Value::Integer(parsed));
        }
    }
    if let Some(value) = env.get("REELGRID_SERVER_MODE") {
        let mode: ServerMode = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv {
                name: "REELGRID_SERVER_MODE",
            })?;
        set_value(
            document,
            "node",
            "server_mode",
            toml::Value::String(mode.as_str().to_string()),
        );
    }
    Ok(())
}

fn set_value(document: &mut toml::Table, table: &str, key: &str, value: toml::Value) {
    let entry = document
        .entry(table.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    if let toml::Value::Table(inner) = entry {
        inner.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    const BASE_FILE: &str = r#"
[database]
host = "db.internal"
name = "reelgrid"
user = "reelgrid"
password = "secret"

[torrent]
tracker_port = 7070
"#;

    #[test]
    fn file_values_load_with_defaults() {
        let file = write_config(BASE_FILE);
        let settings = load_from(file.path(), &HashMap::new()).expect("load");
        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.torrent.tracker_port, 7070);
        assert_eq!(settings.torrent.piece_hash_workers, 4);
        assert_eq!(settings.node.server_mode, ServerMode::Main);
    }

    #[test]
    fn environment_wins_over_file() {
        let file = write_config(BASE_FILE);
        let overrides = env(&[
            ("REELGRID_DB_HOST", "db.failover"),
            ("REELGRID_TRACKER_PORT", "6969"),
            ("REELGRID_SERVER_MODE", "client"),
            ("REELGRID_MAIN_SERVER_URL", "http://main.fleet:8080"),
        ]);
        let settings = load_from(file.path(), &overrides).expect("load");
        assert_eq!(settings.database.host, "db.failover");
        assert_eq!(settings.torrent.tracker_port, 6969);
        assert_eq!(settings.node.server_mode, ServerMode::Client);
        assert_eq!(
            settings.node.main_server_url.as_deref(),
            Some("http://main.fleet:8080")
        );
    }

    #[test]
    fn environment_only_deployment_loads_without_file() {
        let overrides = env(&[
            ("REELGRID_DB_HOST", "db"),
            ("REELGRID_DB_NAME", "reelgrid"),
            ("REELGRID_DB_USER", "svc"),
            ("REELGRID_DB_PASSWORD", "pw"),
        ]);
        let settings =
            load_from(Path::new("/nonexistent/reelgrid.toml"), &overrides).expect("load");
        assert_eq!(settings.database.url(), "postgres://svc:pw@db:5432/reelgrid");
    }

    #[test]
    fn missing_database_credentials_are_fatal() {
        let err = load_from(Path::new("/nonexistent/reelgrid.toml"), &HashMap::new())
            .expect_err("missing credentials");
        assert!(matches!(err, ConfigError::ParseFile { .. }));
    }

    #[test]
    fn client_mode_requires_main_url() {
        let file = write_config(BASE_FILE);
        let overrides = env(&[("REELGRID_SERVER_MODE", "client")]);
        let err = load_from(file.path(), &overrides).expect_err("client without main url");
        assert!(matches!(
            err,
            ConfigError::MissingRequired {
                field: "node.main_server_url"
            }
        ));
    }

    #[test]
    fn malformed_integer_override_rejected() {
        let file = write_config(BASE_FILE);
        let overrides = env(&[("REELGRID_TRACKER_PORT", "not-a-port")]);
        let err = load_from(file.path(), &overrides).expect_err("bad override");
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "REELGRID_TRACKER_PORT"
            }
        ));
    }
}

//! Configuration error surface.

use thiserror::Error;

/// Failures raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}")]
    ReadFile {
        /// Path that could not be read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file was not valid TOML.
    #[error("failed to parse settings file {path}")]
    ParseFile {
        /// Path that failed to parse.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// An environment override held an unusable value.
    #[error("environment variable {name} holds an invalid value")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
    },
    /// A required option is absent from both file and environment.
    #[error("required setting `{field}` is missing")]
    MissingRequired {
        /// Dotted settings path, e.g. `database.host`.
        field: &'static str,
    },
    /// A present option failed validation.
    #[error("setting `{field}` is invalid: {reason}")]
    InvalidValue {
        /// Dotted settings path.
        field: &'static str,
        /// Static validation failure reason.
        reason: &'static str,
    },
}

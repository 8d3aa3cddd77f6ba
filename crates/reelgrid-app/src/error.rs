//! Application-level error surface.

use thiserror::Error;

use reelgrid_config::ConfigError;

/// Fatal startup and runtime failures for the node binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be loaded or validated.
    #[error("configuration error")]
    Config(#[from] ConfigError),
    /// The metadata store was unreachable or migrations failed.
    #[error("metadata store error during {operation}")]
    Store {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// A subsystem failed to start.
    #[error("failed to start {subsystem}")]
    Subsystem {
        /// Subsystem that failed.
        subsystem: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// Waiting for the shutdown signal failed.
    #[error("failed to listen for shutdown signal")]
    Signal(#[source] std::io::Error),
}

impl AppError {
    pub(crate) fn store(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) fn subsystem(subsystem: &'static str, source: anyhow::Error) -> Self {
        Self::Subsystem { subsystem, source }
    }
}

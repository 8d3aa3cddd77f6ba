//! Generation error surface.

use thiserror::Error;

/// Pipeline stage a generation failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    /// Walking the package directory tree.
    Walk,
    /// Reading file metadata.
    Stat,
    /// Reading payload bytes.
    Read,
    /// Flushing a checkpoint batch.
    CheckpointSave,
    /// Marshalling the info dictionary.
    Marshal,
}

impl GenerationStage {
    /// Lowercase label used in queue-row error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Walk => "walk",
            Self::Stat => "stat",
            Self::Read => "read",
            Self::CheckpointSave => "checkpoint-save",
            Self::Marshal => "marshal",
        }
    }
}

/// Why a generation run did not produce a torrent.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A pipeline stage failed; checkpoint state is preserved.
    #[error("generation failed during {}: {cause}", stage.as_str())]
    Stage {
        /// Stage the failure occurred in.
        stage: GenerationStage,
        /// Underlying failure.
        #[source]
        cause: anyhow::Error,
    },
    /// The queue row's cancellation flag was observed at a checkpoint
    /// boundary; no torrent was committed.
    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub(crate) fn stage(stage: GenerationStage, cause: impl Into<anyhow::Error>) -> Self {
        Self::Stage {
            stage,
            cause: cause.into(),
        }
    }
}

//! Package directory walking in declared order.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{GenerationError, GenerationStage};

/// One file of a package, in walk order.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute path on disk.
    pub absolute: PathBuf,
    /// Path components relative to the package root.
    pub components: Vec<String>,
    /// File size in bytes.
    pub length: u64,
}

impl SourceFile {
    /// Relative path joined with `/` for progress reporting.
    #[must_use]
    pub fn relative(&self) -> String {
        self.components.join("/")
    }
}

/// Walk a package directory, returning files sorted by relative path.
///
/// The sort order is the declared order in the info dictionary, so two nodes
/// walking the same tree marshal identical metadata.
///
/// # Errors
///
/// Returns a `walk`-stage error when the tree cannot be traversed and a
/// `stat`-stage error when metadata is unreadable.
pub fn walk_package(package: &Path) -> Result<Vec<SourceFile>, GenerationError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(package).sort_by_file_name() {
        let entry = entry.map_err(|err| GenerationError::stage(GenerationStage::Walk, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| GenerationError::stage(GenerationStage::Stat, err))?;
        let components = entry
            .path()
            .strip_prefix(package)
            .map_err(|err| GenerationError::stage(GenerationStage::Walk, err))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(SourceFile {
            absolute: entry.path().to_path_buf(),
            components,
            length: metadata.len(),
        });
    }
    files.sort_by(|a, b| a.components.cmp(&b.components));
    Ok(files)
}

/// Total payload bytes of a package; used by the queue worker before it
/// hands the directory to the generator.
///
/// # Errors
///
/// Propagates walk and stat failures.
pub fn total_bytes(package: &Path) -> Result<u64, GenerationError> {
    Ok(walk_package(package)?.iter().map(|f| f.length).sum())
}

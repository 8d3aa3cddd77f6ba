#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Torrent generation: canonical metadata for a package directory.
//!
//! The hot path is a streaming reader feeding a bounded pool of SHA-1
//! workers; `(index, hash)` tuples checkpoint to the store in batches so a
//! crash resumes where it left off instead of re-reading terabytes.

mod error;
mod generate;
mod hasher;
mod walk;

pub use error::{GenerationError, GenerationStage};
pub use generate::{GeneratedTorrent, GenerateRequest, Generator};
pub use walk::{SourceFile, total_bytes, walk_package};

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

//! Typed settings for a Reelgrid node.
//!
//! Settings come from an optional TOML file with environment variables taking
//! precedence (`REELGRID_*`). Missing database credentials are fatal at
//! startup; everything else has a sensible default.

mod error;
mod loader;
mod model;

pub use error::ConfigError;
pub use loader::{load, load_from};
pub use model::{DatabaseSettings, NodeSettings, Settings, TorrentSettings};

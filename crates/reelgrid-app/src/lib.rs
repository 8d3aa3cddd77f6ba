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

//! Node bootstrap: reads settings, connects the metadata store, and starts
//! the subsystems in dependency order (tracker, swarm client, generator,
//! queue, orchestrator) for the configured role.

mod bootstrap;
mod error;

pub use bootstrap::run;
pub use error::AppError;

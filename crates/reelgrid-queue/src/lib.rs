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

//! Generation queue: each package is hashed at most once per node, and at
//! most once across the fleet at any instant. Startup recovery reclaims
//! orphaned work after a crash on any peer.

mod check;
mod manager;

pub use check::{HttpQueueCheck, QueueCheckClient};
pub use manager::{QueueManager, QueueManagerConfig};

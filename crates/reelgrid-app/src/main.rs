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

//! Binary entrypoint for a Reelgrid node.

use anyhow::Result;

/// Bootstraps the node and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<()> {
    reelgrid_app::run().await?;
    Ok(())
}

#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

//! Binary entrypoint for the pngsqueeze compression service.

use pngsqueeze_app::{AppResult, run_app};

/// Loads configuration, verifies the compressor, and serves until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}

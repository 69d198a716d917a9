//! `pngquant` adapter for pngsqueeze.
//!
//! Resolves the executable once at startup, then runs one bounded, reaped subprocess
//! per [`pngsqueeze_core::CompressionJob`].
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

mod args;
mod exit;
mod invoker;
mod resolve;

pub use invoker::PngquantCompressor;

//! HTTP surface and request pipeline for pngsqueeze.
//!
//! [`RequestPipeline`] drives one upload through validation, staging, admission,
//! compression, and cleanup. [`ApiServer`] exposes it over axum with problem-document
//! errors, request ids, CORS, and Prometheus metrics.
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

mod error;
mod http;
mod pipeline;
mod state;
#[cfg(test)]
mod testing;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use pipeline::{PipelineParts, RequestPipeline};

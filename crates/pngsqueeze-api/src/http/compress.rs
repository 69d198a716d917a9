//! Compression endpoints.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::Response,
};
use bytes::Bytes;
use pngsqueeze_core::{CompressedImage, CompressionRatio, FileStats, PNG_CONTENT_TYPE};
use tracing::error;

use crate::http::archive::build_archive;
use crate::http::constants::{
    FALLBACK_FILENAME, HEADER_COMPRESSION_RATIO, HEADER_COMPRESSION_STATS, ZIP_CONTENT_TYPE,
    ZIP_FILENAME,
};
use crate::http::errors::ApiError;
use crate::http::upload::{batch_upload, single_upload};
use crate::state::ApiState;

/// `POST /compress`: one image in, one image out.
pub(crate) async fn compress(
    State(state): State<Arc<ApiState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let upload = single_upload(request, state.pipeline.limits()).await?;
    let image = state.pipeline.process(upload).await?;
    let stats = vec![image.stats(FALLBACK_FILENAME)];
    let ratio = image.ratio();
    ImageResponse {
        body: image.into_bytes(),
        content_type: PNG_CONTENT_TYPE,
        attachment: None,
        ratio,
        stats,
    }
    .build()
}

/// `POST /compress-download`: one or more images in, an attachment out.
///
/// A single file comes back as a PNG named after the upload; several come back as a zip.
pub(crate) async fn compress_download(
    State(state): State<Arc<ApiState>>,
    request: Request,
) -> Result<Response, ApiError> {
    let uploads = batch_upload(request, state.pipeline.limits()).await?;
    let mut images = state.pipeline.process_batch(uploads).await?;
    let stats: Vec<FileStats> = images
        .iter()
        .map(|image| image.stats(FALLBACK_FILENAME))
        .collect();
    let ratio = aggregate_ratio(&images);

    if images.len() == 1
        && let Some(image) = images.pop()
    {
        let name = image.filename().unwrap_or(FALLBACK_FILENAME).to_string();
        return ImageResponse {
            body: image.into_bytes(),
            content_type: PNG_CONTENT_TYPE,
            attachment: Some(name),
            ratio,
            stats,
        }
        .build();
    }

    let entries = images
        .into_iter()
        .zip(stats.iter())
        .map(|(image, stat)| (stat.filename.clone(), image.into_bytes()))
        .collect();
    let archive = build_archive(entries).await?;
    ImageResponse {
        body: archive,
        content_type: ZIP_CONTENT_TYPE,
        attachment: Some(ZIP_FILENAME.to_string()),
        ratio,
        stats,
    }
    .build()
}

fn aggregate_ratio(images: &[CompressedImage]) -> CompressionRatio {
    let (original, output) = images.iter().fold((0, 0), |(original, output), image| {
        (
            original + image.original_size(),
            output + image.output_size(),
        )
    });
    CompressionRatio::from_sizes(original, output)
}

struct ImageResponse {
    body: Bytes,
    content_type: &'static str,
    attachment: Option<String>,
    ratio: CompressionRatio,
    stats: Vec<FileStats>,
}

impl ImageResponse {
    fn build(self) -> Result<Response, ApiError> {
        let stats = serde_json::to_string(&self.stats).map_err(|err| {
            error!(error = %err, "failed to serialize compression stats");
            ApiError::internal("failed to serialize compression stats")
        })?;
        let stats = HeaderValue::from_str(&stats).map_err(|err| {
            error!(error = %err, "compression stats are not a valid header value");
            ApiError::internal("failed to encode compression stats")
        })?;

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, self.content_type)
            .header(HEADER_COMPRESSION_RATIO, self.ratio.to_string())
            .header(HEADER_COMPRESSION_STATS, stats);
        if let Some(name) = self.attachment {
            builder = builder.header(CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\""));
        }
        builder.body(Body::from(self.body)).map_err(|err| {
            error!(error = %err, "failed to build compression response");
            ApiError::internal("failed to build compression response")
        })
    }
}

//! Body extraction for single and batch uploads.
//!
//! Raw bodies are buffered under the route's transport cap. Multipart fields are read
//! chunk by chunk and abandoned as soon as one exceeds the per-image limit, so oversized
//! files are never held in memory whole. Hitting the transport cap reports the same
//! oversized-upload violation as the per-image check.

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, multipart::Field},
    http::header::CONTENT_TYPE,
};
use bytes::BytesMut;
use pngsqueeze_core::{UploadLimits, UploadedImage, Violation, sanitize_filename};

use crate::http::errors::ApiError;

const MULTIPART_PREFIX: &str = "multipart/form-data";
const PNG_EXTENSION: &str = ".png";

/// Extract the image of a `POST /compress` request: a raw body, or the first file field
/// of a multipart form.
pub(crate) async fn single_upload(
    request: Request,
    limits: &UploadLimits,
) -> Result<UploadedImage, ApiError> {
    let declared = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let limit = limits.max_upload_bytes;
    if declared.as_deref().is_some_and(is_multipart) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::rejected(rejection.status(), rejection.body_text(), limit))?;
        while let Some(field) = next_field(&mut multipart, limit).await? {
            if field.file_name().is_some() {
                return read_file(field, limits).await;
            }
        }
        return Err(ApiError::violation(Violation::NoFiles));
    }

    let bytes = Bytes::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::rejected(rejection.status(), rejection.body_text(), limit))?;
    Ok(UploadedImage::new(bytes, declared, None))
}

/// Extract every file field of a `POST /compress-download` request.
///
/// Each file must carry a `.png` filename; at most `max_batch_files` are accepted.
pub(crate) async fn batch_upload(
    request: Request,
    limits: &UploadLimits,
) -> Result<Vec<UploadedImage>, ApiError> {
    let limit = limits.max_upload_bytes;
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::rejected(rejection.status(), rejection.body_text(), limit))?;
    let mut uploads = Vec::new();
    while let Some(field) = next_field(&mut multipart, limit).await? {
        if field.file_name().is_none() {
            continue;
        }
        if uploads.len() == limits.max_batch_files {
            return Err(ApiError::violation(Violation::TooManyFiles {
                count: uploads.len() + 1,
                limit: limits.max_batch_files,
            }));
        }
        let upload = read_file(field, limits).await?;
        let filename = upload.filename().unwrap_or_default();
        if !has_png_extension(filename) {
            return Err(ApiError::violation(Violation::NotPngFilename {
                filename: filename.to_string(),
            }));
        }
        uploads.push(upload);
    }
    if uploads.is_empty() {
        return Err(ApiError::violation(Violation::NoFiles));
    }
    Ok(uploads)
}

async fn read_file(mut field: Field<'_>, limits: &UploadLimits) -> Result<UploadedImage, ApiError> {
    let filename = field.file_name().and_then(sanitize_filename);
    let declared = field.content_type().map(str::to_string);
    let limit = limits.max_upload_bytes;

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ApiError::rejected(err.status(), err.body_text(), limit))?
    {
        let size = (buffer.len() + chunk.len()) as u64;
        if size > limit {
            return Err(ApiError::violation(Violation::PayloadTooLarge { size, limit }));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(UploadedImage::new(buffer.freeze(), declared, filename))
}

async fn next_field<'a>(
    multipart: &'a mut Multipart,
    limit: u64,
) -> Result<Option<Field<'a>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|err| ApiError::rejected(err.status(), err.body_text(), limit))
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..MULTIPART_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MULTIPART_PREFIX))
}

fn has_png_extension(filename: &str) -> bool {
    filename.len() > PNG_EXTENSION.len()
        && filename
            .get(filename.len() - PNG_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PNG_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_detection_ignores_case_and_parameters() {
        assert!(is_multipart("multipart/form-data; boundary=x"));
        assert!(is_multipart("Multipart/Form-Data;boundary=x"));
        assert!(!is_multipart("image/png"));
        assert!(!is_multipart("multi"));
    }

    #[test]
    fn png_extension_check_is_case_insensitive() {
        assert!(has_png_extension("shot.PNG"));
        assert!(has_png_extension("a.png"));
        assert!(!has_png_extension(".png"));
        assert!(!has_png_extension("photo.jpg"));
        assert!(!has_png_extension(""));
    }
}

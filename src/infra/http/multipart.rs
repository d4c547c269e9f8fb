//! Multipart form parsing for the `file` and `lang` fields.

use axum::{
    extract::{
        Multipart,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use tracing::warn;

use crate::{application::pipeline::UploadRequest, domain::error::ValidationError};

const SOURCE: &str = "infra::http::multipart";

pub(super) async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    limit_bytes: u64,
) -> Result<UploadRequest, ValidationError> {
    let mut multipart = multipart.map_err(|rejection| {
        ValidationError::invalid_form(rejection.body_text())
    })?;
    let mut upload = UploadRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| read_failure(err, limit_bytes))?
    {
        match field.name() {
            Some("file") => {
                upload.filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| read_failure(err, limit_bytes))?;
                upload.bytes = Some(bytes);
            }
            Some("lang") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| read_failure(err, limit_bytes))?;
                upload.lang = Some(value);
            }
            _ => continue,
        }
    }

    Ok(upload)
}

fn read_failure(err: MultipartError, limit_bytes: u64) -> ValidationError {
    let status = err.status();
    warn!(
        target = SOURCE,
        status = status.as_u16(),
        error = %err,
        "failed to read multipart payload"
    );
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ValidationError::TooLarge { limit_bytes }
    } else {
        ValidationError::invalid_form(err.body_text())
    }
}

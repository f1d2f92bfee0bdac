use std::{sync::Arc, time::Duration};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dicom_stream::TagError;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    media::types::PipeConfig,
    proxy::TrustedProxies,
    storage::{Storage, StorageError},
};

pub mod dicom;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub pipe: PipeConfig,
    pub image_timeout: Duration,
    pub trusted_proxies: Arc<TrustedProxies>,
    /// Server token; each request derives its own child.
    pub cancel: CancellationToken,
}

pub struct ApiError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            err: err.into(),
        }
    }

    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, anyhow::anyhow!("{}", msg))
    }

    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{}", msg))
    }
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    if let Some(e) = err.downcast_ref::<StorageError>() {
        return match e {
            StorageError::InvalidId(_) => StatusCode::BAD_REQUEST,
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::Body { .. } => StatusCode::BAD_REQUEST,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
    }
    if err.downcast_ref::<TagError>().is_some() {
        return StatusCode::BAD_REQUEST;
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("ApiError: {:?}", self.err);
        } else {
            log::debug!("ApiError: {:#}", self.err);
        }

        let message = if self.status.is_server_error() {
            "internal error".to_string()
        } else {
            format!("{:#}", self.err)
        };
        (self.status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: status_for(&err),
            err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let invalid: ApiError = StorageError::InvalidId("a/b".to_string()).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let missing: ApiError = StorageError::NotFound("x".to_string()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let unknown: ApiError = TagError::UnknownName("Bogus".to_string()).into();
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);

        let io: ApiError = std::io::Error::other("disk on fire").into();
        assert_eq!(io.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use std::io::BufReader;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use dicom_stream::{parse_until_eof, tag, Element, OutputFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    handler::{ApiError, ApiJsonResult, ApiResult, AppState},
    media::{
        pipe::FramePipe,
        types::{FailureKind, PipeConfig, PipelineOutcome},
    },
    proxy::ClientIp,
};

pub fn dicom_router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(download).put(upload))
        .route("/{id}/tag", get(find_tag))
        .route("/{id}/image", get(first_image))
}

#[derive(Serialize, Deserialize)]
struct StoredResponse {
    id: String,
    size: u64,
}

#[derive(Deserialize)]
struct TagQuery {
    name: String,
}

#[derive(Deserialize)]
struct ImageQuery {
    format: Option<String>,
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let (len, stream) = state.storage.read_stream(&id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn upload(
    State(state): State<AppState>,
    Extension(ClientIp(client)): Extension<ClientIp>,
    Path(id): Path<String>,
    body: Body,
) -> ApiResult<(StatusCode, Json<StoredResponse>)> {
    let size = state.storage.create(&id, body.into_data_stream()).await?;
    log::info!("stored {} ({} bytes) from {}", id, size, client);
    Ok((StatusCode::CREATED, Json(StoredResponse { id, size })))
}

/// Parses the whole file without frames and returns the first element with
/// the requested tag, searching nested sequences depth first.
async fn find_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TagQuery>,
) -> ApiJsonResult<Element> {
    let tag = tag::find_by_name(&query.name)?;
    let file = state.storage.open(&id).await?;

    let dataset =
        tokio::task::spawn_blocking(move || parse_until_eof(BufReader::new(file), None)).await??;

    let element = dataset
        .find_nested(tag)
        .ok_or_else(|| ApiError::not_found(format!("{} not present in {}", tag, id)))?;
    Ok(Json(element.clone()))
}

async fn first_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ImageQuery>,
) -> ApiResult<Response> {
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<OutputFormat>().map_err(ApiError::bad_request)?,
        None => state.pipe.format,
    };
    let file = state.storage.open(&id).await?;

    let cancel = state.cancel.child_token();
    let pipe = FramePipe::new(PipeConfig {
        format,
        ..state.pipe.clone()
    });

    let run = pipe.first_image(BufReader::new(file), &cancel);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::time::sleep(state.image_timeout) => {
            log::warn!("image {}: no result after {:?}, cancelling", id, state.image_timeout);
            cancel.cancel();
            run.await
        }
    };

    match &outcome {
        PipelineOutcome::Image { length, .. } => {
            log::debug!("image {}: {} bytes as {}", id, length, format)
        }
        PipelineOutcome::NoContent => log::debug!("image {}: no frames", id),
        PipelineOutcome::Failure { kind, cause } => {
            log::warn!("image {}: {:?}: {}", id, kind, cause)
        }
    }
    Ok(outcome.into_response())
}

impl IntoResponse for PipelineOutcome {
    fn into_response(self) -> Response {
        match self {
            PipelineOutcome::Image {
                bytes,
                content_type,
                length,
            } => (
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (header::CONTENT_LENGTH, length.to_string()),
                ],
                bytes,
            )
                .into_response(),
            PipelineOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
            PipelineOutcome::Failure { kind, .. } => {
                let (status, message) = match kind {
                    FailureKind::Cancelled => {
                        (StatusCode::SERVICE_UNAVAILABLE, "image extraction cancelled")
                    }
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "image could not be produced",
                    ),
                };
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

#[cfg(test)]
#[path = "dicom_test.rs"]
mod dicom_test;

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use directio_types::MetadataResponse;
use tracing::{debug, info};

use super::server::ServerState;
use crate::Client;
use crate::error::DirectIoClientError;

pub(super) async fn health_check() -> &'static str {
    "OK"
}

fn error_status(err: &DirectIoClientError) -> StatusCode {
    match err {
        DirectIoClientError::NotFound(_) => StatusCode::BAD_REQUEST,
        DirectIoClientError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        DirectIoClientError::UnprocessableContent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DirectIoClientError::InvalidArguments(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    let Some(token) = state.client.required_token() else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == token)
}

/// `GET /{file_id}`: the metadata listing, with chunk urls pointing back at this server.
pub(super) async fn get_file_metadata(
    State(state): State<Arc<ServerState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !is_authorized(&state, &headers) {
        info!(file_id, "LocalServer rejecting unauthorized metadata request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.client.get_file_metadata(&file_id).await {
        Ok(mut metadata) => {
            rewrite_chunk_urls(&state.endpoint, &file_id, &mut metadata);
            Json(metadata).into_response()
        },
        Err(e) => {
            debug!(file_id, error = %e, "LocalServer metadata request failed");
            error_status(&e).into_response()
        },
    }
}

fn rewrite_chunk_urls(endpoint: &str, file_id: &str, metadata: &mut MetadataResponse) {
    for (i, chunk) in metadata.chunks.iter_mut().enumerate() {
        chunk.url = format!("{endpoint}/chunks/{file_id}/{i}");
    }
}

/// `GET /chunks/{file_id}/{index}`: one raw chunk payload.
pub(super) async fn get_chunk(
    State(state): State<Arc<ServerState>>,
    Path((file_id, index)): Path<(String, usize)>,
) -> std::result::Result<Bytes, StatusCode> {
    state
        .client
        .get_chunk_by_index(&file_id, index)
        .await
        .map_err(|e| match e {
            DirectIoClientError::Other(_) => StatusCode::SERVICE_UNAVAILABLE,
            e => error_status(&e),
        })
}

#[cfg(test)]
mod tests {
    use directio_types::ChunkInfo;

    use super::*;

    #[test]
    fn test_rewrite_chunk_urls() {
        let mut metadata = MetadataResponse {
            chunks: vec![
                ChunkInfo {
                    url: "local://f/0".into(),
                    len: 1,
                },
                ChunkInfo {
                    url: "local://f/1".into(),
                    len: 1,
                },
            ],
            ..Default::default()
        };
        rewrite_chunk_urls("http://127.0.0.1:9", "f", &mut metadata);
        assert_eq!(metadata.chunks[0].url, "http://127.0.0.1:9/chunks/f/0");
        assert_eq!(metadata.chunks[1].url, "http://127.0.0.1:9/chunks/f/1");
    }

    #[test]
    fn test_error_status() {
        assert_eq!(error_status(&DirectIoClientError::NotFound("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(&DirectIoClientError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_status(&DirectIoClientError::UnprocessableContent("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}

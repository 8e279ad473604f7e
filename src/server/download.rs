//! Download path: text, file (resumable), and directory responders.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use log::info;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

use super::archive;
use super::error::RequestError;
use super::{Payload, ServerState, SessionKind};
use crate::auth;

pub async fn handle(
    State(state): State<Arc<ServerState>>,
    UrlPath(token): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, RequestError> {
    if !auth::verify(&token, &state.token) {
        return Err(RequestError::Forbidden);
    }

    match &state.kind {
        SessionKind::Send(Payload::Text(text)) => Ok(text_response(text)),
        SessionKind::Send(Payload::File(path)) => file_response(path, &headers).await,
        SessionKind::Send(Payload::Directory(path)) => dir_response(path, &state).await,
        SessionKind::Host { .. } => Err(RequestError::NotFound),
    }
}

/// Whole-blob text response. Never resumable; caching fully disabled.
fn text_response(text: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        text.to_owned(),
    )
        .into_response()
}

async fn file_response(path: &Path, headers: &HeaderMap) -> Result<Response, RequestError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| RequestError::NotFound)?;
    if !meta.is_file() {
        return Err(RequestError::NotFound);
    }
    let size = meta.len();
    let name = base_name(path);

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|_| RequestError::NotFound)?;

    if let Some(start) = parse_range_start(headers).filter(|s| *s > 0) {
        // An offset past the end cannot be honored; fall back to a full
        // transfer rather than failing the request.
        if start < size && file.seek(SeekFrom::Start(start)).await.is_ok() {
            info!("resuming download of {} from byte {}", name, start);
            return Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_DISPOSITION, attachment(&name)),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, size - 1, size),
                    ),
                    (header::CONTENT_LENGTH, (size - start).to_string()),
                ],
                Body::from_stream(ReaderStream::new(file)),
            )
                .into_response());
        }
        file.seek(SeekFrom::Start(0)).await?;
    }

    Ok((
        [
            (header::CONTENT_DISPOSITION, attachment(&name)),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn dir_response(path: &Path, state: &ServerState) -> Result<Response, RequestError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| RequestError::NotFound)?;
    if !meta.is_dir() {
        return Err(RequestError::NotFound);
    }
    let name = format!("{}.zip", base_name(path));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&name)),
        ],
        archive::zip_body(path.to_path_buf(), Arc::clone(&state.pool)),
    )
        .into_response())
}

fn attachment(name: &str) -> String {
    format!("attachment; filename=\"{}\"", name)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string())
}

/// Parse the open-ended `Range: bytes=N-` form.
///
/// Closed ranges, suffix ranges, and multi-range requests are ignored, which
/// downgrades them to a full transfer.
fn parse_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    let (start, rest) = spec.split_once('-')?;
    if !rest.is_empty() {
        return None;
    }
    start.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, value.parse().unwrap());
        headers
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_range_start(&range_headers("bytes=5242880-")), Some(5242880));
        assert_eq!(parse_range_start(&range_headers("bytes=0-")), Some(0));
    }

    #[test]
    fn ignores_unsupported_range_forms() {
        assert_eq!(parse_range_start(&range_headers("bytes=0-499")), None);
        assert_eq!(parse_range_start(&range_headers("bytes=-500")), None);
        assert_eq!(parse_range_start(&range_headers("items=3-")), None);
        assert_eq!(parse_range_start(&HeaderMap::new()), None);
    }

    #[test]
    fn base_name_falls_back() {
        assert_eq!(base_name(Path::new("/tmp/photo.jpg")), "photo.jpg");
        assert_eq!(base_name(Path::new("/")), "download");
    }
}

//! Upload path (host mode): raw fast path and multipart fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequest, Multipart, Path as UrlPath, Request, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use super::error::RequestError;
use super::{ServerState, SessionKind, IDLE_TIMEOUT};
use crate::auth;

/// Out-of-band filename header that selects the raw fast path.
const FILENAME_HEADER: &str = "x-file-name";
/// Suffix-disambiguation attempts before falling back to a timestamp.
const MAX_RENAME_ATTEMPTS: u32 = 1000;

static UPLOAD_PAGE: &str = include_str!("static/upload.html");

/// GET: serve the static upload form.
pub async fn form(
    State(state): State<Arc<ServerState>>,
    UrlPath(token): UrlPath<String>,
) -> Result<Html<&'static str>, RequestError> {
    if !auth::verify(&token, &state.token) {
        return Err(RequestError::Forbidden);
    }
    Ok(Html(UPLOAD_PAGE))
}

/// POST: ingest one upload, picking the strategy by header presence.
pub async fn ingest(
    State(state): State<Arc<ServerState>>,
    UrlPath(token): UrlPath<String>,
    request: Request,
) -> Result<Response, RequestError> {
    if !auth::verify(&token, &state.token) {
        return Err(RequestError::Forbidden);
    }
    let upload_dir = match &state.kind {
        SessionKind::Host { upload_dir } => upload_dir.clone(),
        SessionKind::Send(_) => return Err(RequestError::NotFound),
    };
    tokio::fs::create_dir_all(&upload_dir).await?;

    let declared_name = request
        .headers()
        .get(FILENAME_HEADER)
        .map(|v| v.to_str().map(str::to_owned))
        .transpose()
        .map_err(|_| RequestError::InvalidFilename)?;

    match declared_name {
        Some(encoded) => raw_upload(&state, &upload_dir, &encoded, request).await,
        None => {
            let multipart = Multipart::from_request(request, &())
                .await
                .map_err(|e| RequestError::Malformed(e.to_string()))?;
            multipart_upload(&state, &upload_dir, multipart).await
        }
    }
}

/// Raw fast path: the body *is* the file. No boundary scanning, straight
/// socket-to-disk copy through a pooled buffer.
async fn raw_upload(
    state: &ServerState,
    dir: &Path,
    encoded: &str,
    request: Request,
) -> Result<Response, RequestError> {
    let started = Instant::now();

    let declared_len = content_length(&request);
    if declared_len.is_some_and(|len| len > state.max_upload_bytes) {
        return Err(RequestError::TooLarge);
    }

    let decoded = urlencoding::decode(encoded).map_err(|_| RequestError::InvalidFilename)?;
    let name = sanitize_name(&decoded)?;

    let (mut file, dest) = create_unique(dir, &name).await?;
    let saved_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(name);
    let mut guard = PartialFileGuard::new(dest.clone());

    // Reserve the space up front when the length is known; failure here is
    // not fatal, the copy just fragments.
    if let Some(len) = declared_len.filter(|l| *l > 0) {
        if let Err(e) = file.set_len(len).await {
            warn!("failed to pre-allocate {} bytes for {}: {}", len, saved_name, e);
        }
    }

    let body = request
        .into_body()
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(Box::pin(body));
    let written = copy_to_file(&mut reader, &mut file, state, 0).await?;
    file.flush().await?;
    guard.disarm();

    log_received(&saved_name, written, started);
    Ok(Json(json!({ "success": true, "filename": saved_name, "size": written })).into_response())
}

/// Multipart fallback: stream each file part to disk, skip the rest.
async fn multipart_upload(
    state: &ServerState,
    dir: &Path,
    mut multipart: Multipart,
) -> Result<Response, RequestError> {
    let mut saved: Vec<SavedFile> = Vec::new();
    let mut total: u64 = 0;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(RequestError::Malformed(e.to_string())),
        };

        // Skip non-file fields and unusable names.
        let Some(raw_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let Ok(name) = sanitize_name(&raw_name) else {
            continue;
        };

        let started = Instant::now();
        let (mut file, dest) = create_unique(dir, &name).await?;
        let saved_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(name);
        let mut guard = PartialFileGuard::new(dest.clone());

        let part = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(Box::pin(part));
        let written = copy_to_file(&mut reader, &mut file, state, total).await?;
        file.flush().await?;
        guard.disarm();

        total += written;
        log_received(&saved_name, written, started);
        saved.push(SavedFile {
            filename: saved_name,
            size: written,
        });
    }

    if saved.is_empty() {
        return Err(RequestError::NoFile);
    }

    Ok((
        [
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(json!({ "saved": saved })),
    )
        .into_response())
}

#[derive(Serialize)]
struct SavedFile {
    filename: String,
    size: u64,
}

/// Copy `reader` into `file` through a pooled buffer.
///
/// `already` counts bytes ingested earlier in the same request so the ceiling
/// covers the whole body. Each read must land within the idle deadline.
async fn copy_to_file<R>(
    reader: &mut R,
    file: &mut tokio::fs::File,
    state: &ServerState,
    already: u64,
) -> Result<u64, RequestError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = state.pool.acquire();
    let mut written: u64 = 0;
    loop {
        let n = match tokio::time::timeout(IDLE_TIMEOUT, reader.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                return Err(RequestError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "idle deadline exceeded",
                )))
            }
        };
        if n == 0 {
            return Ok(written);
        }
        written += n as u64;
        if already + written > state.max_upload_bytes {
            return Err(RequestError::TooLarge);
        }
        file.write_all(&buf[..n]).await?;
    }
}

/// Reduce a declared filename to a safe base name confined to the upload dir.
fn sanitize_name(declared: &str) -> Result<String, RequestError> {
    let base = declared.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(RequestError::InvalidFilename);
    }
    Ok(base.to_string())
}

/// Split "photo.jpg" into ("photo", ".jpg"); dotfiles keep their name whole.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Probe-then-create the destination, disambiguating collisions with
/// " (1)", " (2)", ... and a timestamp suffix after too many attempts.
async fn create_unique(dir: &Path, name: &str) -> std::io::Result<(tokio::fs::File, PathBuf)> {
    let (stem, ext) = split_name(name);
    for attempt in 0..MAX_RENAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{} ({}){}", stem, attempt, ext)
        };
        let path = dir.join(candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let path = dir.join(format!("{}_{}{}", stem, nanos, ext));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    Ok((file, path))
}

/// Deletes the destination on drop unless the write completed.
struct PartialFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => info!("removed incomplete upload {}", self.path.display()),
                Err(e) => warn!(
                    "failed to remove partial upload {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }
    }
}

fn content_length(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn log_received(name: &str, bytes: u64, started: Instant) {
    let secs = started.elapsed().as_secs_f64();
    let mbps = if secs > 0.0 {
        (bytes as f64 * 8.0) / (secs * 1_000_000.0)
    } else {
        0.0
    };
    info!(
        "{}, {} received in {:.2}s ({:.1} Mbps)",
        name,
        format_bytes(bytes),
        secs,
        mbps
    );
}

/// Human-readable byte count, e.g. "3.4 MB".
fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        ['K', 'M', 'G', 'T', 'P', 'E'][exp]
    )
}

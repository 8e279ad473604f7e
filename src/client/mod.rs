//! Transfer client: fetch a session payload, resuming partial downloads.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info};
use reqwest::{header, StatusCode};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Byte-count observer: `(bytes_so_far, total)`.
///
/// On a resumed transfer the count starts at the resumed offset, so the
/// numbers reflect whole-file progress.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// How a fetched payload was delivered.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// Saved to disk at the returned path.
    File(PathBuf),
    /// Inline text, streamed to the output sink; no file artifact.
    Text,
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("destination '{}' exists; pass --force to overwrite", .0.display())]
    DestinationConflict(PathBuf),
    #[error("server answered HTTP {0}")]
    Status(StatusCode),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ReceiveOptions {
    /// Explicit output file, or a directory to save into.
    pub output: Option<PathBuf>,
    /// Overwrite an existing destination instead of resuming or failing.
    pub force: bool,
    pub progress: Option<ProgressFn>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            output: None,
            force: false,
            progress: None,
        }
    }
}

/// Fetch `url` and stream the payload to disk, or to `text_out` for inline
/// text. Partial local files are resumed with a range request when possible.
pub async fn receive<W>(
    url: &str,
    options: &ReceiveOptions,
    text_out: &mut W,
) -> Result<Received, ReceiveError>
where
    W: AsyncWrite + Unpin,
{
    let client = reqwest::Client::new();

    // Initial un-ranged request to learn what we're fetching.
    let initial = client.get(url).send().await?;
    ensure_success(initial.status())?;

    let content_type = header_str(&initial, header::CONTENT_TYPE);
    let disposition = header_str(&initial, header::CONTENT_DISPOSITION);

    // Inline text goes straight to the output sink; resume never applies.
    let is_text = content_type
        .as_deref()
        .map_or(false, |ct| ct.starts_with("text/plain"))
        && disposition.is_none();
    if is_text {
        let mut stream = initial.bytes_stream();
        while let Some(chunk) = stream.next().await {
            text_out.write_all(&chunk?).await?;
        }
        text_out.flush().await?;
        return Ok(Received::Text);
    }

    let name = disposition
        .as_deref()
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(initial.url().path()))
        .unwrap_or_else(|| "download.bin".to_string());
    let total = initial.content_length();
    drop(initial);

    let dest = destination_path(options.output.clone(), &name);

    // A non-empty local file shorter than the advertised total is resumable.
    let existing = tokio::fs::metadata(&dest).await.ok().map(|m| m.len());
    let resume_from = match existing {
        Some(len) if !options.force && len > 0 && total.map_or(false, |t| len < t) => len,
        Some(_) if !options.force => return Err(ReceiveError::DestinationConflict(dest)),
        _ => 0,
    };

    let (mut file, start, response) = if resume_from > 0 {
        let response = client
            .get(url)
            .header(header::RANGE, format!("bytes={}-", resume_from))
            .send()
            .await?;
        if response.status() == StatusCode::PARTIAL_CONTENT {
            info!("resuming download at byte {}", resume_from);
            let file = OpenOptions::new().append(true).open(&dest).await?;
            (file, resume_from, response)
        } else {
            // Server cannot resume: restart from scratch.
            debug!("server declined the range request; restarting");
            drop(response);
            let response = client.get(url).send().await?;
            ensure_success(response.status())?;
            (File::create(&dest).await?, 0, response)
        }
    } else {
        let response = client.get(url).send().await?;
        ensure_success(response.status())?;
        (File::create(&dest).await?, 0, response)
    };

    let mut transferred = start;
    if let Some(progress) = &options.progress {
        progress(transferred, total);
    }
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        transferred += chunk.len() as u64;
        if let Some(progress) = &options.progress {
            progress(transferred, total);
        }
    }
    file.flush().await?;

    Ok(Received::File(dest))
}

fn ensure_success(status: StatusCode) -> Result<(), ReceiveError> {
    if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
        Ok(())
    } else {
        Err(ReceiveError::Status(status))
    }
}

fn header_str(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Pull the filename out of `attachment; filename="name"`.
fn filename_from_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if part.to_ascii_lowercase().starts_with("filename=") {
            let name = part["filename=".len()..].trim().trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn filename_from_url(path: &str) -> Option<String> {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_owned)
}

fn destination_path(output: Option<PathBuf>, name: &str) -> PathBuf {
    match output {
        None => PathBuf::from(name),
        Some(p) if p.is_dir() => p.join(name),
        Some(p) => p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_parsing() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"photo.jpg\""),
            Some("photo.jpg".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; FILENAME=report.pdf"),
            Some("report.pdf".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn url_fallback_takes_last_segment() {
        assert_eq!(filename_from_url("/d/abc123"), Some("abc123".to_string()));
        assert_eq!(filename_from_url("/d/abc123/"), Some("abc123".to_string()));
        assert_eq!(filename_from_url("/"), None);
    }

    #[test]
    fn destination_prefers_explicit_output() {
        assert_eq!(
            destination_path(None, "a.bin"),
            PathBuf::from("a.bin")
        );
        assert_eq!(
            destination_path(Some(PathBuf::from("out.dat")), "a.bin"),
            PathBuf::from("out.dat")
        );
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            destination_path(Some(dir.path().to_path_buf()), "a.bin"),
            dir.path().join("a.bin")
        );
    }
}

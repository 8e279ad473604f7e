//! Streaming zip archiving of a directory tree.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use axum::body::Body;
use bytes::Bytes;
use futures_channel::mpsc;
use futures_util::io::AsyncWriteExt;
use futures_util::SinkExt;
use log::{debug, error};
use tokio::io::{AsyncReadExt, AsyncWrite};
use walkdir::WalkDir;

use super::pool::BufferPool;

/// Number of in-flight body chunks. Bounds memory independent of archive size.
const CHANNEL_DEPTH: usize = 8;

/// Stream `dir` as a deflate-compressed zip archive in an HTTP response body.
///
/// The archive is composed on the fly; nothing is materialized on disk, and at
/// most one file is read and compressed at a time. A read failure mid-walk
/// surfaces as a body error, aborting the response.
pub fn zip_body(dir: PathBuf, pool: Arc<BufferPool>) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    let mut err_tx = tx.clone();
    tokio::spawn(async move {
        let writer = ChannelWriter { tx };
        if let Err(e) = write_zip(&dir, writer, &pool).await {
            error!("zip stream for {} aborted: {e:#}", dir.display());
            let _ = err_tx
                .send(Err(io::Error::new(io::ErrorKind::Other, format!("{e:#}"))))
                .await;
        }
    });
    Body::from_stream(rx)
}

/// Walk `root` in stable order and write each regular file into `writer` as a
/// deflate zip entry named by its path relative to `root`.
async fn write_zip<W>(root: &Path, writer: W, pool: &Arc<BufferPool>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(writer);
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.context("walking source directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("computing relative member name")?;
        let name = rel.to_string_lossy().replace('\\', "/");
        debug!("archiving {}", name);

        let opts = ZipEntryBuilder::new(name.into(), Compression::Deflate);
        let mut member = zip
            .write_entry_stream(opts)
            .await
            .context("opening zip entry")?;
        let mut file = tokio::fs::File::open(entry.path())
            .await
            .with_context(|| format!("opening {}", entry.path().display()))?;

        let mut buf = pool.acquire();
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            member.write_all(&buf[..n]).await?;
        }
        member.close().await.context("closing zip entry")?;
    }
    zip.close().await.context("finishing archive")?;
    Ok(())
}

/// `AsyncWrite` adapter that forwards chunks into a bounded channel feeding
/// the response body. Backpressure from the socket propagates to the walk.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response stream closed")
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.tx.poll_ready(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(_)) => Poll::Ready(Err(stream_closed())),
            Poll::Ready(Ok(())) => {
                let chunk = Bytes::copy_from_slice(buf);
                self.tx
                    .start_send(Ok(chunk))
                    .map_err(|_| stream_closed())?;
                Poll::Ready(Ok(buf.len()))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Chunks are handed to the channel on write; nothing to flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

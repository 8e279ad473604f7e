//! Transfer server: one session, one authenticated endpoint.

mod archive;
mod download;
mod error;
mod pool;
mod upload;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::network::discovery::{self, Advertiser, ServiceRecord};
use crate::network::interface;
use pool::BufferPool;

/// URL prefix of download sessions.
pub const DOWNLOAD_PREFIX: &str = "/d/";
/// URL prefix of upload (host mode) sessions.
pub const UPLOAD_PREFIX: &str = "/u/";

/// Default ceiling on one upload request body.
pub const DEFAULT_MAX_UPLOAD: u64 = 10 << 30; // 10 GiB

/// Deadline for one read on an upload body before the connection is dropped.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP keepalive probe time; bounds how long a dead peer holds a connection.
const KEEPALIVE_TIME: Duration = Duration::from_secs(180);

// 32 KiB buffers work well for socket-to-disk copies on most systems.
const BUFFER_SIZE: usize = 32 * 1024;
const POOL_CAPACITY: usize = 8;

/// What a send-mode session serves.
#[derive(Debug, Clone)]
pub enum Payload {
    File(PathBuf),
    Directory(PathBuf),
    Text(String),
}

impl Payload {
    /// Resolve a source path into a file or directory payload.
    ///
    /// The kind is fixed here, once, for the session's lifetime.
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("cannot access '{}'", path.display()))?;
        if meta.is_dir() {
            Ok(Payload::Directory(path.to_path_buf()))
        } else {
            Ok(Payload::File(path.to_path_buf()))
        }
    }
}

/// Session mode: serve a payload, or collect uploads.
#[derive(Debug, Clone)]
pub enum SessionKind {
    Send(Payload),
    Host { upload_dir: PathBuf },
}

/// Immutable description of one session, built once at process start and
/// passed into every handler.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub token: String,
    pub kind: SessionKind,
    /// Bind to a specific interface by name.
    pub interface: Option<String>,
    /// Bind to an explicit address, skipping interface selection.
    pub bind: Option<IpAddr>,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub max_upload_bytes: u64,
}

impl SessionConfig {
    pub fn new(token: String, kind: SessionKind) -> Self {
        Self {
            token,
            kind,
            interface: None,
            bind: None,
            port: 0,
            max_upload_bytes: DEFAULT_MAX_UPLOAD,
        }
    }
}

/// Shared request-handler state.
pub(crate) struct ServerState {
    pub(crate) token: String,
    pub(crate) kind: SessionKind,
    pub(crate) max_upload_bytes: u64,
    pub(crate) pool: Arc<BufferPool>,
}

/// A running transfer server bound to one address.
pub struct TransferServer {
    addr: SocketAddr,
    url: String,
    advertiser: Option<Advertiser>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl TransferServer {
    /// Bind, start serving, and advertise the session.
    pub async fn start(config: SessionConfig) -> Result<Self> {
        let ip = match config.bind {
            Some(ip) => ip,
            None => interface::lan_ip(config.interface.as_deref())?,
        };
        let listener = bind_listener(SocketAddr::new(ip, config.port))?;
        let addr = listener.local_addr()?;

        let (mode, prefix) = match &config.kind {
            SessionKind::Send(_) => ("send", DOWNLOAD_PREFIX),
            SessionKind::Host { .. } => ("host", UPLOAD_PREFIX),
        };
        let path = format!("{}{}", prefix, config.token);
        let url = format!("http://{}{}", addr, path);

        let state = Arc::new(ServerState {
            token: config.token.clone(),
            kind: config.kind,
            max_upload_bytes: config.max_upload_bytes,
            pool: BufferPool::new(POOL_CAPACITY, BUFFER_SIZE),
        });

        let app = match &state.kind {
            SessionKind::Send(_) => Router::new().route("/d/:token", get(download::handle)),
            SessionKind::Host { .. } => Router::new()
                .route("/u/:token", get(upload::form).post(upload::ingest))
                // The ceiling is enforced in the copy loops instead.
                .layer(DefaultBodyLimit::disable()),
        }
        .with_state(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!("serving on {}", url);

        // Advertise via mDNS, best-effort: a failure here must never block
        // the transfer path.
        let token_prefix: String = config.token.chars().take(6).collect();
        let record = ServiceRecord {
            instance: format!("zipline-{}", token_prefix),
            mode: mode.to_string(),
            token: config.token,
            path,
            address: ip,
            port: addr.port(),
        };
        let advertiser = match discovery::advertise(&record) {
            Ok(adv) => Some(adv),
            Err(e) => {
                warn!("mDNS advertise failed: {}", e);
                None
            }
        };

        Ok(Self {
            addr,
            url,
            advertiser,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The full session URL, e.g. `http://192.168.1.9:40123/d/<token>`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Retract the advertisement and stop accepting connections.
    pub async fn shutdown(mut self) {
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.shutdown();
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("server stopped with error: {}", e),
                Err(e) => warn!("server task panicked: {}", e),
            }
        }
    }
}

/// Bind a TCP listener with keepalive enabled so dead peers are reaped.
fn bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    let listener: std::net::TcpListener = socket.into();
    Ok(tokio::net::TcpListener::from_std(listener)?)
}

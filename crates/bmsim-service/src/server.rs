//! TCP telemetry server.
//!
//! Each accepted connection gets its own task. Requests on a connection are
//! answered strictly in order; a slow or silent client only ever holds up its
//! own task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use bmsim_core::protocol::write_frame;
use bmsim_core::{
    DEFAULT_MAX_FRAME_BYTES, Engine, ErrorKind, Frame, FrameReader, Payload, Request, Response,
    SharedEngine,
};

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors raised while starting the server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Listener settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Longest accepted request line in bytes, excluding the newline.
    pub max_frame_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerOptions {
    /// Set the frame length limit.
    #[must_use]
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }
}

/// Point-in-time server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Connections currently open.
    pub active_connections: usize,
    /// Connections accepted since the server started.
    pub total_connections: u64,
    /// Responses written, including error responses.
    pub requests_served: u64,
    /// Frames rejected as malformed or oversized.
    pub bad_requests: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    total: AtomicU64,
    served: AtomicU64,
    bad: AtomicU64,
}

/// Decrements the active connection count when a handler exits.
struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A running telemetry server.
///
/// Dropping the server signals every task to stop but does not wait for
/// them. Call [`TelemetryServer::stop`] for a graceful drain.
pub struct TelemetryServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl TelemetryServer {
    /// Bind `host:port` and start accepting connections.
    ///
    /// `host` may be an address or a hostname. Port 0 picks a free port; see
    /// [`TelemetryServer::local_addr`]. Must be called from within a tokio
    /// runtime.
    pub async fn listen(
        engine: SharedEngine,
        host: &str,
        port: u16,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let counters = Arc::new(Counters::default());

        tracker.spawn(accept_loop(
            listener,
            engine,
            options,
            cancel.clone(),
            tracker.clone(),
            Arc::clone(&counters),
        ));

        info!("Telemetry server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            cancel,
            tracker,
            counters,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            active_connections: self.counters.active.load(Ordering::Relaxed),
            total_connections: self.counters.total.load(Ordering::Relaxed),
            requests_served: self.counters.served.load(Ordering::Relaxed),
            bad_requests: self.counters.bad.load(Ordering::Relaxed),
        }
    }

    /// Whether [`TelemetryServer::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting, let each connection finish the request it is serving,
    /// and wait for every task to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Telemetry server on {} stopped", self.local_addr);
    }
}

impl Drop for TelemetryServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: SharedEngine,
    options: ServerOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<Counters>,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                counters.total.fetch_add(1, Ordering::Relaxed);
                counters.active.fetch_add(1, Ordering::Relaxed);
                debug!("Accepted connection from {}", peer);

                let guard = ActiveGuard(Arc::clone(&counters));
                tracker.spawn(serve_connection(
                    stream,
                    peer,
                    Arc::clone(&engine),
                    options,
                    cancel.clone(),
                    guard,
                ));
            }
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    debug!("Accept loop exited");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: SharedEngine,
    options: ServerOptions,
    cancel: CancellationToken,
    guard: ActiveGuard,
) {
    let counters = Arc::clone(&guard.0);
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FrameReader::new(BufReader::new(read_half), options.max_frame_bytes);

    loop {
        // Cancellation is only observed between messages.
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing connection from {} for shutdown", peer);
                break;
            }
            frame = frames.next_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Connection from {} closed by peer", peer);
                break;
            }
            Err(e) => {
                warn!("Read from {} failed: {}", peer, e);
                break;
            }
        };

        let response = match frame {
            Frame::Oversized => {
                counters.bad.fetch_add(1, Ordering::Relaxed);
                warn!("Rejected oversized frame from {}", peer);
                Response::error(
                    ErrorKind::BadRequest,
                    format!("Frame exceeds {} bytes", options.max_frame_bytes),
                )
            }
            Frame::Line(line) => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match Request::from_frame(&line) {
                    Ok(request) => {
                        debug!("{} from {}", request.command(), peer);
                        dispatch(&engine, &request)
                    }
                    Err(e) => {
                        counters.bad.fetch_add(1, Ordering::Relaxed);
                        warn!("Bad request from {}: {}", peer, e);
                        Response::from_error(&e)
                    }
                }
            }
        };

        if let Err(e) = write_frame(&mut write_half, &response).await {
            warn!("Write to {} failed: {}", peer, e);
            break;
        }
        counters.served.fetch_add(1, Ordering::Relaxed);
    }

    drop(guard);
}

/// Answer one decoded request from the engine.
fn dispatch(engine: &Engine, request: &Request) -> Response {
    let result = match request {
        Request::ReadSensor { sensor } => engine.read_one(sensor).map(|r| Payload::Value(r.value)),
        Request::ReadAll => engine
            .read_all()
            .map(|snapshot| Payload::Readings(snapshot.values.clone())),
        Request::GetDeviceInfo => Ok(Payload::Device(engine.device_info())),
    };

    match result {
        Ok(data) => Response::ok(data),
        Err(e) => {
            debug!("{} failed: {}", request.command(), e);
            Response::from_error(&e)
        }
    }
}

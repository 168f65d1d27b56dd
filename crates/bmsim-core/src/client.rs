//! TCP client for the telemetry server.
//!
//! [`TelemetryClient`] keeps one connection open and sends one request at a
//! time over it. Requests from concurrent tasks queue behind each other, so a
//! response is always paired with the request that produced it.
//!
//! # Reconnection
//!
//! When the connection drops mid-exchange the client reconnects once and
//! resends the request. If that second attempt fails as well, the error is
//! returned as [`Error::ConnectionLost`], with the reconnect failure in its
//! detail; the next call starts over with the same policy. Reopening a
//! connection dropped by an earlier call uses up the reconnect for that call. A timed-out
//! connection is discarded, so a late response can never be read as the answer
//! to a later request.
//!
//! # Example
//!
//! ```no_run
//! use bmsim_core::{ClientOptions, TelemetryClient};
//!
//! # async fn example() -> bmsim_core::Result<()> {
//! let client = TelemetryClient::connect("127.0.0.1", 47808, ClientOptions::default()).await?;
//! let values = client.read_all_sensors().await?;
//! for (name, value) in values.iter() {
//!     println!("{name}: {value:.2}");
//! }
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bmsim_types::{DeviceInfo, SensorValues};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_BYTES, Frame, FrameReader, Payload, Request, Response, write_frame};
use crate::traits::ReadingSource;

/// Timeouts and limits for a [`TelemetryClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long to wait for a connection to be established.
    /// Default: 5 seconds.
    pub connect_timeout: Duration,
    /// How long the convenience methods wait for a response.
    /// Default: 5 seconds.
    pub request_timeout: Duration,
    /// Longest response frame accepted.
    pub max_frame_bytes: usize,
    /// Reconnect and resend once when the connection drops mid-exchange.
    /// Default: true.
    pub reconnect: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect: true,
        }
    }
}

impl ClientOptions {
    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the largest accepted response frame.
    #[must_use]
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Enable or disable the single reconnect attempt.
    #[must_use]
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }
}

struct Connection {
    reader: FrameReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

enum ConnectionState {
    Connected(Connection),
    /// Dropped after an error or timeout. The next request reconnects.
    Dropped,
    /// Closed by [`TelemetryClient::disconnect`].
    Disconnected,
}

/// A connection to a telemetry server.
pub struct TelemetryClient {
    host: String,
    port: u16,
    options: ClientOptions,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl TelemetryClient {
    /// Connect to a server.
    ///
    /// `host` may be an IP address or a host name.
    pub async fn connect(host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        let connection = open(host, port, &options).await?;
        info!("Connected to telemetry server at {}:{}", host, port);
        Ok(Self {
            host: host.to_string(),
            port,
            options,
            state: Mutex::new(ConnectionState::Connected(connection)),
        })
    }

    /// The server address as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The client's options.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Connected(_))
    }

    /// Close the connection. Later requests fail with
    /// [`Error::NotConnected`] until [`reconnect`](Self::reconnect).
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let ConnectionState::Connected(mut connection) =
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        {
            let _ = connection.writer.shutdown().await;
            debug!("Disconnected from {}", self.addr());
        }
    }

    /// Open a fresh connection, replacing any existing one.
    pub async fn reconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Dropped;
        *state = ConnectionState::Connected(open(&self.host, self.port, &self.options).await?);
        info!("Reconnected to {}", self.addr());
        Ok(())
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// The timeout covers the whole call, including reopening a dropped
    /// connection and the single reconnect. Time spent queued behind other
    /// requests on this client is not counted.
    pub async fn request(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let mut state = self.state.lock().await;
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, self.attempt(&mut *state, request)).await {
            Ok(result) => result,
            Err(_) => {
                if !matches!(*state, ConnectionState::Disconnected) {
                    *state = ConnectionState::Dropped;
                }
                Err(Error::timeout(request.command(), timeout))
            }
        }
    }

    async fn attempt(&self, state: &mut ConnectionState, request: &Request) -> Result<Response> {
        let mut reconnected = false;

        if matches!(*state, ConnectionState::Disconnected) {
            return Err(Error::NotConnected);
        }
        if matches!(*state, ConnectionState::Dropped) {
            *state = ConnectionState::Connected(open(&self.host, self.port, &self.options).await?);
            reconnected = true;
            debug!("Reopened connection to {}", self.addr());
        }

        loop {
            let ConnectionState::Connected(connection) = &mut *state else {
                return Err(Error::NotConnected);
            };

            match exchange(connection, request).await {
                Ok(response) => return Ok(response),
                Err(Error::ConnectionLost(detail)) if self.options.reconnect && !reconnected => {
                    warn!("Connection to {} lost ({}), reconnecting once", self.addr(), detail);
                    *state = ConnectionState::Dropped;
                    match open(&self.host, self.port, &self.options).await {
                        Ok(connection) => *state = ConnectionState::Connected(connection),
                        Err(e) => {
                            return Err(Error::connection_lost(format!("{detail}; reconnect failed: {e}")));
                        }
                    }
                    reconnected = true;
                }
                Err(e) => {
                    if matches!(e, Error::ConnectionLost(_)) {
                        *state = ConnectionState::Dropped;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Read one sensor.
    pub async fn read_sensor(&self, name: &str) -> Result<f64> {
        let response = self
            .request(&Request::read_sensor(name), self.options.request_timeout)
            .await?;
        match response.into_payload()? {
            Payload::Value(value) => Ok(value),
            other => Err(Error::invalid_response(format!(
                "expected a sensor value, got {other:?}"
            ))),
        }
    }

    /// Read every sensor from one server snapshot.
    pub async fn read_all_sensors(&self) -> Result<SensorValues> {
        let response = self
            .request(&Request::ReadAll, self.options.request_timeout)
            .await?;
        match response.into_payload()? {
            Payload::Readings(values) => Ok(values),
            other => Err(Error::invalid_response(format!(
                "expected sensor readings, got {other:?}"
            ))),
        }
    }

    /// Read device identity and the sensor catalogue.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let response = self
            .request(&Request::GetDeviceInfo, self.options.request_timeout)
            .await?;
        match response.into_payload()? {
            Payload::Device(info) => Ok(info),
            other => Err(Error::invalid_response(format!(
                "expected device info, got {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl ReadingSource for TelemetryClient {
    async fn read_values(&self) -> Result<SensorValues> {
        self.read_all_sensors().await
    }

    async fn read_value(&self, sensor: &str) -> Result<f64> {
        self.read_sensor(sensor).await
    }

    async fn read_device_info(&self) -> Result<DeviceInfo> {
        self.device_info().await
    }
}

async fn open(host: &str, port: u16, options: &ClientOptions) -> Result<Connection> {
    let addr = format!("{}:{}", host, port);
    let dial = async {
        let targets: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| Error::connection_failed(&addr, ConnectionFailureReason::Unresolvable))?
            .collect();
        if targets.is_empty() {
            return Err(Error::connection_failed(&addr, ConnectionFailureReason::Unresolvable));
        }
        TcpStream::connect(&targets[..])
            .await
            .map_err(|e| Error::connection_failed(&addr, ConnectionFailureReason::from_io(&e)))
    };

    let stream = tokio::time::timeout(options.connect_timeout, dial)
        .await
        .map_err(|_| Error::connection_failed(&addr, ConnectionFailureReason::Timeout))??;
    let _ = stream.set_nodelay(true);

    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        reader: FrameReader::new(BufReader::new(read_half), options.max_frame_bytes),
        writer: write_half,
    })
}

async fn exchange(connection: &mut Connection, request: &Request) -> Result<Response> {
    write_frame(&mut connection.writer, request)
            .await
        .map_err(|e| Error::connection_lost(e.to_string()))?;

    loop {
        match connection.reader.next_frame().await {
            Ok(Some(Frame::Line(line))) if line.trim_ascii().is_empty() => continue,
            Ok(Some(Frame::Line(line))) => return Response::from_frame(&line),
            Ok(Some(Frame::Oversized)) => {
                return Err(Error::invalid_response("response exceeds the frame limit"));
            }
            Ok(None) => return Err(Error::connection_lost("server closed the connection")),
            Err(e) => return Err(Error::connection_lost(e.to_string())),
        }
    }
}

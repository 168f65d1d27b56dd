//! Wire protocol between telemetry clients and the server.
//!
//! Messages are JSON objects, one per line, over TCP.
//!
//! ```text
//! -> {"command":"read_sensor","sensor":"wind_speed"}
//! <- {"status":"ok","data":3.2}
//! -> {"command":"read_all"}
//! <- {"status":"ok","data":{"total_electric_energy":12.4,...}}
//! -> {"command":"read_sensor","sensor":"pressure"}
//! <- {"status":"error","kind":"UnknownSensor","message":"Unknown sensor: pressure"}
//! ```
//!
//! Responses on one connection come back in request order.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use bmsim_types::{DeviceInfo, SensorValues};

use crate::error::{Error, Result};

/// Default TCP port for the telemetry server.
pub const DEFAULT_PORT: u16 = 47808;

/// Default upper bound on the length of one frame, excluding the newline.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Read one sensor's current value.
    ReadSensor {
        /// Sensor name.
        sensor: String,
    },
    /// Read every sensor from one snapshot.
    ReadAll,
    /// Read device identity and the sensor catalogue.
    #[serde(alias = "device_info")]
    GetDeviceInfo,
}

impl Request {
    /// Build a `read_sensor` request.
    pub fn read_sensor(sensor: impl Into<String>) -> Self {
        Self::ReadSensor {
            sensor: sensor.into(),
        }
    }

    /// Short name used in logs and timeout errors.
    pub fn command(&self) -> &'static str {
        match self {
            Self::ReadSensor { .. } => "read_sensor",
            Self::ReadAll => "read_all",
            Self::GetDeviceInfo => "get_device_info",
        }
    }

    /// Decode a request frame.
    ///
    /// Any problem with the frame is a [`Error::BadRequest`].
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| Error::BadRequest("frame is not valid UTF-8".to_string()))?;
        serde_json::from_str(text).map_err(|e| Error::BadRequest(format!("malformed request: {e}")))
    }
}

/// Machine-readable category of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The requested sensor does not exist.
    UnknownSensor,
    /// The request could not be decoded.
    BadRequest,
    /// The server failed while handling a valid request.
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSensor => write!(f, "UnknownSensor"),
            Self::BadRequest => write!(f, "BadRequest"),
            Self::InternalError => write!(f, "InternalError"),
        }
    }
}

/// Data carried by a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A single sensor value.
    Value(f64),
    /// Every sensor value, in catalogue order.
    Readings(SensorValues),
    /// Device metadata.
    Device(DeviceInfo),
}

/// A response sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// The request succeeded.
    Ok {
        /// The result.
        data: Payload,
    },
    /// The request failed.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl Response {
    /// A successful response.
    pub fn ok(data: Payload) -> Self {
        Self::Ok { data }
    }

    /// An error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Map an engine or decode failure to the response sent on the wire.
    pub fn from_error(err: &Error) -> Self {
        let kind = match err {
            Error::UnknownSensor(_) => ErrorKind::UnknownSensor,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            _ => ErrorKind::InternalError,
        };
        Self::error(kind, err.to_string())
    }

    /// Decode a response frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame).map_err(|e| Error::invalid_response(e.to_string()))
    }

    /// Unwrap the payload, turning error responses into typed errors.
    pub fn into_payload(self) -> Result<Payload> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { kind, message } => Err(match kind {
                ErrorKind::UnknownSensor => Error::UnknownSensor(message),
                ErrorKind::BadRequest => Error::BadRequest(message),
                ErrorKind::InternalError => Error::Server(message),
            }),
        }
    }
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(Vec<u8>),
    /// A line longer than the limit. Its bytes have been discarded.
    Oversized,
}

/// Reads newline-delimited frames with a length limit.
///
/// An oversized line is skipped up to its newline and reported as
/// [`Frame::Oversized`], so the stream stays usable for the next frame.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Read the next frame. Returns `None` on a clean end of stream.
    ///
    /// A trailing `\r` is stripped. Bytes after the last newline at end of
    /// stream form a final frame.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        let limit = self.max_frame_bytes as u64 + 1;
        let mut line = Vec::new();
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some(Frame::Line(line)));
        }

        if n as u64 >= limit {
            self.skip_line().await?;
            return Ok(Some(Frame::Oversized));
        }

        Ok(Some(Frame::Line(line)))
    }

    async fn skip_line(&mut self) -> io::Result<()> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(());
            }
            let (consumed, done) = match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (buf.len(), false),
            };
            self.reader.consume(consumed);
            if done {
                return Ok(());
            }
        }
    }
}

/// Serialise `message` as one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message).map_err(io::Error::other)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

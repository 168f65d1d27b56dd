//! Error types for bmsim-core.
//!
//! One enum covers the engine, the wire client and the monitor, so code that
//! reads from a local engine or a remote one handles the same failures.
//!
//! # Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::UnknownSensor`] | Do not retry, the name is wrong |
//! | [`Error::NotRunning`] | Start the engine first |
//! | [`Error::OutOfRange`] | Fix the value, or enable clamping |
//! | [`Error::Timeout`] | Retry; the client already dropped the stale connection |
//! | [`Error::ConnectionLost`] | Retry; the client reconnects once per call |
//! | [`Error::ConnectionFailed`] | Retry later, the server may be restarting |
//! | [`Error::NotConnected`] | Call `reconnect` |
//! | [`Error::BadRequest`] | Do not retry, the request is malformed |
//! | [`Error::InvalidResponse`] | Do not retry, the peer speaks another protocol |

use std::time::Duration;

use thiserror::Error;

use bmsim_types::CatalogueError;

/// Errors raised by the engine, the telemetry client and the monitor.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The sensor name is not in the catalogue.
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// `start` was called on a running engine.
    #[error("Engine is already running")]
    AlreadyRunning,

    /// The engine has never been started, so there is no snapshot yet.
    #[error("Engine has not been started")]
    NotRunning,

    /// An override value lies outside the sensor's range.
    #[error("Value {value} for '{sensor}' is outside [{min}, {max}]")]
    OutOfRange {
        /// The sensor being overridden.
        sensor: String,
        /// The rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Could not establish a connection.
    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed {
        /// The address that was dialled.
        addr: String,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// The connection broke or closed in the middle of an exchange.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The client was explicitly disconnected.
    #[error("Not connected to server")]
    NotConnected,

    /// The server could not decode the request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The server failed while handling the request.
    #[error("Server error: {0}")]
    Server(String),

    /// The response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Nothing is listening on the port.
    Refused,
    /// The host or network cannot be reached.
    Unreachable,
    /// The host name did not resolve to any address.
    Unresolvable,
    /// Connection attempt timed out.
    Timeout,
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refused => write!(f, "connection refused"),
            Self::Unreachable => write!(f, "host unreachable"),
            Self::Unresolvable => write!(f, "host name did not resolve"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl ConnectionFailureReason {
    /// Classify a socket error from a connect attempt.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => Self::Refused,
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => Self::Unreachable,
            ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Other(err.to_string()),
        }
    }
}

impl Error {
    /// Create an unknown sensor error.
    pub fn unknown_sensor(name: impl Into<String>) -> Self {
        Self::UnknownSensor(name.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(addr: impl Into<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            reason,
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(detail: impl Into<String>) -> Self {
        Self::ConnectionLost(detail.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Whether the failure concerns the transport rather than the request.
    ///
    /// Transport failures are worth retrying; the others will fail the same
    /// way again. The monitor records both as gaps and uses this to pick the
    /// log level.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionLost(_)
                | Self::Timeout { .. }
                | Self::NotConnected
                | Self::Io(_)
        )
    }
}

impl From<CatalogueError> for Error {
    fn from(err: CatalogueError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Result type alias using bmsim-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unknown_sensor("pressure");
        assert_eq!(err.to_string(), "Unknown sensor: pressure");

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to server");

        let err = Error::timeout("read_all", Duration::from_secs(2));
        assert!(err.to_string().contains("read_all"));
        assert!(err.to_string().contains("2s"));

        let err = Error::OutOfRange {
            sensor: "wind_speed".to_string(),
            value: 12.0,
            min: 0.0,
            max: 9.3,
        };
        assert!(err.to_string().contains("wind_speed"));
        assert!(err.to_string().contains("9.3"));
    }

    #[test]
    fn test_connection_failed_display() {
        let err = Error::connection_failed("127.0.0.1:47808", ConnectionFailureReason::Refused);
        assert_eq!(
            err.to_string(),
            "Connection to 127.0.0.1:47808 failed: connection refused"
        );
    }

    #[test]
    fn test_reason_from_io() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(ConnectionFailureReason::from_io(&io), ConnectionFailureReason::Refused);

        let io = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(ConnectionFailureReason::from_io(&io), ConnectionFailureReason::Timeout);

        let io = std::io::Error::other("weird");
        assert!(matches!(
            ConnectionFailureReason::from_io(&io),
            ConnectionFailureReason::Other(_)
        ));
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::connection_lost("eof").is_transport());
        assert!(Error::timeout("x", Duration::from_millis(1)).is_transport());
        assert!(Error::NotConnected.is_transport());
        assert!(!Error::unknown_sensor("x").is_transport());
        assert!(!Error::BadRequest("x".into()).is_transport());
    }

    #[test]
    fn test_catalogue_error_conversion() {
        let err: Error = CatalogueError::Empty.into();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("no sensors"));
    }
}

//! Error types for tunnel operations

use thiserror::Error;

/// Errors that can occur during tunnel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol-level error (invalid frame format, decode failure)
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol violation
        message: String,
    },

    /// Authentication error (wrong password, rate-limited)
    #[error("Authentication error: {reason}")]
    Auth {
        /// Reason for authentication failure
        reason: String,
    },

    /// Connection error (connection refused, closed, I/O failure)
    #[error("Connection error: {source}")]
    Connection {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Session error (session not found, closed, already exists)
    #[error("Session error: {message}")]
    Session {
        /// Error message describing the session issue
        message: String,
    },

    /// Configuration error (invalid config, missing required field)
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Service is shutting down
    #[error("Service is shutting down")]
    Shutdown,
}

impl Error {
    /// Create a new protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    #[must_use]
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Create a new session error
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new connection error from any error type
    #[must_use]
    pub fn connection<E: std::error::Error>(err: E) -> Self {
        Self::Connection {
            source: std::io::Error::other(err.to_string()),
        }
    }

    /// Create a new connection error with a message
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            source: std::io::Error::other(message.into()),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("unknown frame type");
        assert_eq!(err.to_string(), "Protocol error: unknown frame type");

        let err = Error::auth("wrong password");
        assert_eq!(err.to_string(), "Authentication error: wrong password");

        let err = Error::session("session not found");
        assert_eq!(err.to_string(), "Session error: session not found");

        let err = Error::config("missing relay_url");
        assert_eq!(err.to_string(), "Configuration error: missing relay_url");

        let err = Error::Timeout;
        assert_eq!(err.to_string(), "Operation timed out");

        let err = Error::Shutdown;
        assert_eq!(err.to_string(), "Service is shutting down");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    fn test_connection_msg() {
        let err = Error::connection_msg("relay closed the channel");
        assert!(err.to_string().contains("relay closed the channel"));
    }
}

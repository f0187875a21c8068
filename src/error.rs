//! Error types for proxy commands and cursor operations.

use thiserror::Error;

/// All errors that can occur while talking to the data proxy.
#[derive(Debug, Error)]
pub enum MongoError {
    /// The proxy answered with a non-2xx status or a `success: false` envelope.
    #[error("command failed ({status}): {message}")]
    Command {
        /// HTTP status of the response.
        status: u16,
        /// Message reported by the server.
        message: String,
    },

    /// A builder method was called after the cursor issued its first request.
    #[error("cursor already initialized")]
    CursorInitialized,

    /// The server reply did not have the expected cursor shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Text at the codec boundary was not valid JSON.
    #[error("ejson error: {0}")]
    Ejson(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// BSON error.
    #[error("bson error: {0}")]
    Bson(String),
}

impl MongoError {
    /// Create a command error.
    pub fn command(status: u16, message: impl Into<String>) -> Self {
        MongoError::Command {
            status,
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        MongoError::Protocol(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        MongoError::InvalidArgument(msg.into())
    }

    /// Check if the server rejected the command.
    pub fn is_command_error(&self) -> bool {
        matches!(self, MongoError::Command { .. })
    }

    /// Check if this error comes from the HTTP layer itself.
    pub fn is_network_error(&self) -> bool {
        matches!(self, MongoError::Http(_))
    }

    /// Check if this is a timeout reported by the HTTP client.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MongoError::Http(err) if err.is_timeout())
    }

    /// Get the HTTP status if available.
    pub fn status(&self) -> Option<u16> {
        match self {
            MongoError::Command { status, .. } => Some(*status),
            MongoError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for MongoError {
    fn from(err: serde_json::Error) -> Self {
        MongoError::Ejson(err.to_string())
    }
}

impl From<bson::ser::Error> for MongoError {
    fn from(err: bson::ser::Error) -> Self {
        MongoError::Bson(err.to_string())
    }
}

impl From<bson::de::Error> for MongoError {
    fn from(err: bson::de::Error) -> Self {
        MongoError::Bson(err.to_string())
    }
}

impl From<bson::extjson::de::Error> for MongoError {
    fn from(err: bson::extjson::de::Error) -> Self {
        MongoError::Ejson(err.to_string())
    }
}

impl From<url::ParseError> for MongoError {
    fn from(err: url::ParseError) -> Self {
        MongoError::InvalidArgument(err.to_string())
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, MongoError>;

/// Error kind enumeration for pattern matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server rejected the command.
    Command,
    /// Cursor misuse, e.g. mutating a running cursor.
    State,
    /// Malformed server reply.
    Protocol,
    /// Serialization error.
    Serialization,
    /// Network error.
    Network,
    /// Bad URI or option supplied by the caller.
    InvalidArgument,
}

impl MongoError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MongoError::Command { .. } => ErrorKind::Command,
            MongoError::CursorInitialized => ErrorKind::State,
            MongoError::Protocol(_) => ErrorKind::Protocol,
            MongoError::Ejson(_)
            | MongoError::Serialization(_)
            | MongoError::Deserialization(_)
            | MongoError::Bson(_) => ErrorKind::Serialization,
            MongoError::Http(_) => ErrorKind::Network,
            MongoError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

//! Error types for teeprompt.
//!
//! Every failure in a prompt exchange maps onto one of a small number of
//! kinds.  The kind decides how the failure propagates: invalid input and
//! configuration are reported before any network activity, transport and
//! decode failures end the exchange, and logging failures never escape the
//! audit path.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// The main error type for teeprompt.
#[derive(Clone, Debug)]
pub enum Error {
    /// The prompt text cannot be turned into turns (e.g. it is empty).
    InvalidInput {
        /// Human-readable error message.
        message: String,
    },

    /// Mutually exclusive options were combined or a required option is missing.
    InvalidConfig {
        /// Human-readable error message.
        message: String,
        /// Option that caused the error.
        param: Option<String>,
    },

    /// The request could not be delivered or the server rejected it.
    Transport {
        /// HTTP status code, when the server answered.
        status: Option<u16>,
        /// Human-readable error message (the response body for HTTP errors).
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A streamed event could not be decoded.
    StreamDecode {
        /// Human-readable error message.
        message: String,
        /// Text decoded before the failure.
        partial: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The user cancelled the exchange mid-stream.
    Interrupted,

    /// The audit store could not record a session.
    Logging {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },
}

impl Error {
    /// Creates a new invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new invalid configuration error.
    pub fn invalid_config(message: impl Into<String>, param: Option<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
            param,
        }
    }

    /// Creates a new transport error.
    pub fn transport(
        status: Option<u16>,
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            status,
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new stream decode error that preserves the text decoded so far.
    pub fn stream_decode(
        message: impl Into<String>,
        partial: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::StreamDecode {
            message: message.into(),
            partial: partial.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new logging error.
    pub fn logging(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Logging {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Returns true if this error is an invalid input error.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::InvalidInput { .. })
    }

    /// Returns true if this error is an invalid configuration error.
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Error::InvalidConfig { .. })
    }

    /// Returns true if this error is a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Returns true if this error is a stream decode error.
    pub fn is_stream_decode(&self) -> bool {
        matches!(self, Error::StreamDecode { .. })
    }

    /// Returns true if the user interrupted the exchange.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Returns true if this error is a logging error.
    pub fn is_logging(&self) -> bool {
        matches!(self, Error::Logging { .. })
    }

    /// Returns the HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the text decoded before a stream decode failure, if any.
    pub fn partial(&self) -> Option<&str> {
        match self {
            Error::StreamDecode { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput { message } => {
                write!(f, "Invalid input: {message}")
            }
            Error::InvalidConfig { message, param } => {
                if let Some(param) = param {
                    write!(f, "Invalid configuration: {message} (option: {param})")
                } else {
                    write!(f, "Invalid configuration: {message}")
                }
            }
            Error::Transport {
                status, message, ..
            } => {
                if let Some(status) = status {
                    write!(f, "Transport error: HTTP {status}: {message}")
                } else {
                    write!(f, "Transport error: {message}")
                }
            }
            Error::StreamDecode { message, .. } => {
                write!(f, "Stream decode error: {message}")
            }
            Error::Interrupted => {
                write!(f, "Interrupted")
            }
            Error::Logging { message, .. } => {
                write!(f, "Logging error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::StreamDecode { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Logging { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

// Only the audit path serializes with `?`; the decoder maps its own failures.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::logging(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::invalid_config(format!("URL parse error: {err}"), Some("base_url".to_string()))
    }
}

/// A specialized Result type for teeprompt operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn transport_display_includes_status() {
        let err = Error::transport(Some(500), "boom", None);
        assert_eq!(err.to_string(), "Transport error: HTTP 500: boom");
        assert_eq!(err.status_code(), Some(500));
        assert!(err.is_transport());
    }

    #[test]
    fn transport_display_without_status() {
        let err = Error::transport(None, "connection refused", None);
        assert_eq!(err.to_string(), "Transport error: connection refused");
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn stream_decode_keeps_partial() {
        let err = Error::stream_decode("bad json", "The cat", None);
        assert!(err.is_stream_decode());
        assert_eq!(err.partial(), Some("The cat"));
        assert_eq!(Error::Interrupted.partial(), None);
    }

    #[test]
    fn io_error_has_source() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn url_error_is_invalid_config() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(err.is_invalid_config());
        assert!(err.to_string().contains("base_url"));
    }
}

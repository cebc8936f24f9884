//! Error types for the download engine.
//!
//! Every failure a job can end with is a [`DownloadError`]. The coarse
//! [`ErrorKind`] groups variants the way callers present them: transport
//! trouble, a server that violated range semantics, local IO, a user abort,
//! or bad input.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failure classes reported by an HTTP transport.
///
/// Retry policies decide per kind whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportErrorKind {
    /// Connect or read timed out.
    Timeout,
    /// The remote host actively refused the connection.
    ConnectionRefused,
    /// An established connection was reset by the peer.
    ConnectionReset,
    /// Any other connect failure (DNS, TLS handshake, unreachable host).
    Connect,
    /// The response body ended early or could not be read.
    StreamBroken,
    /// Anything the transport could not classify.
    Other,
}

impl TransportErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Timeout,
        Self::ConnectionRefused,
        Self::ConnectionReset,
        Self::Connect,
        Self::StreamBroken,
        Self::Other,
    ];

    /// Returns the stable label used in config files and CLI flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection-refused",
            Self::ConnectionReset => "connection-reset",
            Self::Connect => "connect",
            Self::StreamBroken => "stream-broken",
            Self::Other => "other",
        }
    }

    /// Parses a label produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ways a server can answer a range request inconsistently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Status was not `206 Partial Content`.
    UnexpectedStatus {
        /// Status the server returned.
        status: u16,
    },
    /// A 206 response without a `Content-Range` header.
    MissingContentRange,
    /// `Content-Range` could not be parsed as `bytes a-b/total`.
    MalformedContentRange {
        /// The raw header value.
        value: String,
    },
    /// The served interval differs from the requested one.
    RangeMismatch {
        /// Requested first byte.
        expected_first: u64,
        /// Requested last byte (inclusive).
        expected_last: u64,
        /// Served first byte.
        actual_first: u64,
        /// Served last byte (inclusive).
        actual_last: u64,
    },
    /// The served resource size differs from the size the job was built for.
    SizeMismatch {
        /// Size the job expects.
        expected: u64,
        /// Size the server reported.
        actual: u64,
    },
    /// The body carried more bytes than the requested interval.
    BodyOverrun {
        /// Bytes the interval allows.
        expected: u64,
    },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedStatus { status } => {
                write!(f, "expected HTTP 206, got HTTP {status}")
            }
            Self::MissingContentRange => f.write_str("206 response without Content-Range"),
            Self::MalformedContentRange { value } => {
                write!(f, "malformed Content-Range '{value}'")
            }
            Self::RangeMismatch {
                expected_first,
                expected_last,
                actual_first,
                actual_last,
            } => write!(
                f,
                "requested bytes {expected_first}-{expected_last}, served {actual_first}-{actual_last}"
            ),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "resource size changed: expected {expected}, server reports {actual}")
            }
            Self::BodyOverrun { expected } => {
                write!(f, "body exceeded the requested {expected} bytes")
            }
        }
    }
}

/// Coarse error classes for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network trouble; possibly transient.
    Transport,
    /// The server does not honor range requests correctly.
    ProtocolViolation,
    /// Local file system failure.
    Io,
    /// Caller-initiated cancellation.
    UserAbort,
    /// Invalid job or configuration.
    Input,
    /// Engine invariant broken.
    Internal,
}

impl ErrorKind {
    /// Returns a short label used in user-facing messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::ProtocolViolation => "protocol",
            Self::Io => "io",
            Self::UserAbort => "aborted",
            Self::Input => "input",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while probing or downloading a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level failure (connect, timeout, broken stream).
    #[error("transport error ({kind}) downloading {url}: {message}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// Failure class used by retry policies.
        kind: TransportErrorKind,
        /// Transport-specific detail.
        message: String,
    },

    /// The server answered a range request inconsistently.
    #[error("protocol violation from {url}: {violation}")]
    ProtocolViolation {
        /// The URL being fetched.
        url: String,
        /// What was wrong with the response.
        violation: ProtocolViolation,
    },

    /// Local file system error while writing the destination.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Job or configuration values are unusable.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Human-readable explanation.
        reason: String,
    },

    /// The range probe was not answered with `206 Partial Content`.
    #[error("server does not support range requests for {url} (HTTP {status})")]
    RangeNotSupported {
        /// The probed URL.
        url: String,
        /// Status the server returned.
        status: u16,
    },

    /// All workers exited but some bytes were never recorded as completed.
    #[error("download incomplete: expected {expected} bytes, completed {actual}")]
    Incomplete {
        /// Total size of the resource.
        expected: u64,
        /// Bytes recorded as completed.
        actual: u64,
    },

    /// The operation was cancelled.
    #[error("download aborted")]
    Aborted,

    /// An engine invariant was broken (for example a worker task panicked).
    #[error("internal error: {reason}")]
    Internal {
        /// Human-readable explanation.
        reason: String,
    },
}

impl DownloadError {
    /// Creates a transport error.
    pub fn transport(
        url: impl Into<String>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol(url: impl Into<String>, violation: ProtocolViolation) -> Self {
        Self::ProtocolViolation {
            url: url.into(),
            violation,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates a range-not-supported error.
    pub fn range_not_supported(url: impl Into<String>, status: u16) -> Self {
        Self::RangeNotSupported {
            url: url.into(),
            status,
        }
    }

    /// Creates an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Returns the coarse class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::ProtocolViolation { .. } | Self::RangeNotSupported { .. } => {
                ErrorKind::ProtocolViolation
            }
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidInput { .. } => ErrorKind::Input,
            Self::Aborted => ErrorKind::UserAbort,
            Self::Incomplete { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the transport failure class, if this is a transport error.
    #[must_use]
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if this error only reports a cancellation.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

// No From<std::io::Error>: the Io variant needs the destination path.

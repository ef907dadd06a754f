//! Error types for the RTSP relay core.

use std::fmt;

/// Errors that can occur anywhere in the relay core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`PortUnavailable`](Self::PortUnavailable),
///   [`PoolExhausted`](Self::PoolExhausted).
/// - **Protocol**: [`Parse`](Self::Parse), [`TransportInvalid`](Self::TransportInvalid).
/// - **Admission**: [`Unauthorized`](Self::Unauthorized), [`Forbidden`](Self::Forbidden).
/// - **Mounts/sessions**: [`NotFound`](Self::NotFound), [`Conflict`](Self::Conflict).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No mount or session matches the request (maps to 404/454).
    #[error("not found: {0}")]
    NotFound(String),

    /// Admission hook rejected the request (maps to 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Authentication missing or invalid (maps to 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A mount or stream already exists where a new one was requested (maps to 503).
    #[error("conflict: {0}")]
    Conflict(String),

    /// UDP bind failed with address-in-use. Recovered locally by port cycling
    /// (see [`crate::mount::Mount::setup`] and the subscriber SETUP path);
    /// never surfaced to the peer.
    #[error("port {0} unavailable: {1}")]
    PortUnavailable(u16, std::io::Error),

    /// The port pool has no free pairs left (maps to 500).
    #[error("port pool exhausted")]
    PoolExhausted,

    /// A `Transport` header was missing or malformed (maps to 400/500
    /// depending on caller context).
    #[error("invalid transport header: {0}")]
    TransportInvalid(String),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Anything else that doesn't fit a more specific kind (maps to 500).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

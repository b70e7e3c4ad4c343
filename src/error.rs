//! Error types for the VoIP library.

use std::fmt;

/// Errors that can occur across the signalling and media stack.
///
/// Variants map to specific failure modes:
///
/// - **Codec**: [`Parse`](Self::Parse) — malformed signalling messages.
/// - **Dialog**: [`Protocol`](Self::Protocol) — missing mandatory headers,
///   messages not valid for the current dialog state, tags required but
///   absent.
/// - **Session**: [`Timeout`](Self::Timeout) — the peer never produced the
///   expected message within the bounded wait. Distinct from a negative
///   response, which is a [`Protocol`](Self::Protocol) error.
/// - **Media**: [`ShortPacket`](Self::ShortPacket) — a datagram below the
///   12-byte RTP header minimum. Filtered inside the receive path; never
///   reaches the payload consumer.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
#[derive(Debug, thiserror::Error)]
pub enum VoipError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a signalling message.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Message was syntactically valid but not acceptable in context.
    #[error("protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// No expected message arrived within the bounded wait.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Media datagram shorter than the fixed RTP header.
    #[error("media datagram too short: {len} bytes")]
    ShortPacket { len: usize },
}

/// Specific kind of signalling parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Start line was neither a known request method nor a status line.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Status line carried a non-numeric or non-3-digit code.
    InvalidStatusCode,
    /// Body length did not match the declared `Content-Length`.
    BodyLengthMismatch,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidStatusCode => write!(f, "invalid status code"),
            Self::BodyLengthMismatch => write!(f, "body length differs from Content-Length"),
        }
    }
}

/// Specific kind of protocol violation.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// A mandatory header (Via, From, To, Call-ID, CSeq) was absent.
    MissingHeader(&'static str),
    /// ACK or BYE was requested before the peer's tag was learned.
    MissingRemoteTag,
    /// The message is not valid for the dialog's current state.
    UnexpectedMessage { state: &'static str, event: &'static str },
    /// A 200 OK body could not be parsed for a media endpoint.
    InvalidMediaDescription,
    /// The peer answered with a non-success status.
    UnexpectedStatus(u16),
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader(name) => write!(f, "missing mandatory header: {name}"),
            Self::MissingRemoteTag => write!(f, "remote tag not yet learned"),
            Self::UnexpectedMessage { state, event } => {
                write!(f, "unexpected {event} in state {state}")
            }
            Self::InvalidMediaDescription => write!(f, "body has no parsable media endpoint"),
            Self::UnexpectedStatus(code) => write!(f, "peer answered {code}"),
        }
    }
}

impl VoipError {
    /// Shorthand for building a [`Protocol`](Self::Protocol) error.
    pub(crate) fn protocol(kind: ProtocolErrorKind) -> Self {
        VoipError::Protocol { kind }
    }
}

/// Convenience alias for `Result<T, VoipError>`.
pub type Result<T> = std::result::Result<T, VoipError>;

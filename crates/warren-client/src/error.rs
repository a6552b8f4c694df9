// Caller-facing error kinds. The connection never raises; every failure
// comes back as one of these, and fatal transport or framing failures are
// fanned out to every parked caller, so the type is Clone.
use warren_wire::{CodecError, ResponseCode};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The connection is not open (never connected, closing, or closed).
    #[error("connection is closed")]
    Closed,
    /// The peer closed the TCP socket.
    #[error("tcp connection closed by peer")]
    TcpClosed,
    /// A socket-level failure.
    #[error("tcp error: {0}")]
    Tcp(String),
    /// The inbound byte stream violated the framing rules.
    #[error("protocol framing error: {0}")]
    Frame(#[from] CodecError),
    /// The server answered a command with a non-ok code.
    #[error("server responded with {0:?}")]
    Response(ResponseCode),
    /// The argument was rejected locally, nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

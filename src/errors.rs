use std::time::Duration;
use thiserror::Error;

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transfer core.
///
/// Every variant is fatal to the current session: there is no mid-transfer
/// recovery. The engine that detects one of these emits a best-effort
/// `TransferError` frame to the peer, closes the transport and surfaces the
/// typed error to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer or relay closed the connection
    #[error("transport closed")]
    TransportClosed,

    /// Malformed frame or message
    #[error("decode error: {0}")]
    Decode(String),

    /// AEAD authentication failure (tampered frame or key mismatch)
    #[error("authentication failed")]
    Auth,

    /// A message arrived in a state where it is not legal
    #[error("transfer unsynchronized, expected state: {expected}, actual: {actual}")]
    WrongState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Invalid handshake or join exchange
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The relay slot already holds a peer with the same role
    #[error("slot is busy")]
    SlotBusy,

    /// The second peer did not arrive before the pairing deadline
    #[error("no peer arrived before the pairing deadline")]
    PairTimeout,

    /// Received payload length differs from the advertised size
    #[error("payload size mismatch: advertised {expected} bytes, received {actual}")]
    PayloadSizeMismatch { expected: u64, actual: u64 },

    /// No frame arrived within the per-frame read deadline
    #[error("idle timeout after {0:?}")]
    IdleTimeout(Duration),

    /// The PAKE exchange did not complete in time
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The PAKE key derivation failed outright
    #[error("PAKE key derivation failed")]
    Pake,

    /// The peer reported a transfer error and is tearing down
    #[error("peer reported transfer error: {0}")]
    Peer(String),

    /// Local shutdown was requested mid-transfer
    #[error("transfer cancelled")]
    Cancelled,

    /// The supplied password does not parse
    #[error("invalid password: {0}")]
    Password(String),

    /// Bad command-line input
    #[error("{0}")]
    Usage(String),

    /// Could not reach the relay at all
    #[error("relay unreachable at {0}")]
    RelayUnreachable(String),
}

impl Error {
    /// Process exit code for the CLI: 0 success, 1 user error,
    /// 2 transfer failure, 3 relay unreachable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Password(_) | Error::Usage(_) => 1,
            Error::RelayUnreachable(_) => 3,
            _ => 2,
        }
    }
}

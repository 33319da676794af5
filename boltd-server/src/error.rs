//! Server error types.

use thiserror::Error;

/// Errors fatal to a connection or the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] boltd_protocol::ProtocolError),

    #[error("invalid handshake magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("server shutting down")]
    ShuttingDown,
}

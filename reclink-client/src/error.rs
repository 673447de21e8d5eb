//! Client error types.

use reclink_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection already opened; create a fresh connection instead")]
    AlreadyConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("read timeout")]
    Timeout,

    #[error("backend rejected handshake, its version is {backend_version}")]
    HandshakeRejected { backend_version: i32 },

    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(Vec<String>),

    #[error("unknown command '{name}': not in the catalogue for any version")]
    UnknownCommand { name: String },

    #[error("command '{name}' is not supported by backend version {version}")]
    UnsupportedCommand { name: String, version: i32 },
}

impl ClientError {
    /// Whether this error leaves the connection unusable.
    ///
    /// The two command-validity errors are raised before any byte is written,
    /// so the connection survives them; everything else means the session is
    /// dead and must be reopened.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ClientError::UnknownCommand { .. } | ClientError::UnsupportedCommand { .. }
        )
    }
}

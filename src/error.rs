use thiserror::Error;

use crate::protocol::{packet::ErrPayloadBytes, response::ErrPayload};

pub use color_eyre::eyre::eyre;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("Authentication failed: {0}")]
    Authentication(ErrPayload),

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Protocol desync: expected sequence id {expected}, received {received}")]
    ProtocolDesync { expected: u8, received: u8 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection is closing")]
    ConnectionClosing,

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    /// Whether the connection that produced this error can no longer serve commands.
    ///
    /// Server errors, usage errors and refused features end one command and leave the
    /// packet stream in sync. Everything else tears the connection down.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ServerError(_)
                | Error::UnsupportedFeature(_)
                | Error::BadConfigError(_)
                | Error::BadUsageError(_)
        )
    }

    /// Connection-closed class, as seen by commands rejected on shutdown.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::ConnectionClosing)
    }

    /// The server error payload, when the server produced this error.
    pub fn server_error(&self) -> Option<&ErrPayload> {
        match self {
            Error::ServerError(err) | Error::Authentication(err) => Some(err),
            _ => None,
        }
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_keeps_connection() {
        let err = Error::from(ErrPayloadBytes(b"\xff\x7a\x04#42S02Table 'test.t' doesn't exist"));
        assert!(!err.is_connection_fatal());
        let payload = err.server_error().map(|e| e.error_code);
        assert_eq!(payload, Some(1146));
        assert!(err.to_string().contains("Table 'test.t' doesn't exist"));
    }

    #[test]
    fn test_fatal_classes() {
        assert!(
            Error::ProtocolDesync {
                expected: 1,
                received: 3
            }
            .is_connection_fatal()
        );
        assert!(Error::UnexpectedEof.is_connection_fatal());
        assert!(Error::ConnectionClosed.is_connection_fatal());
        assert!(!Error::UnsupportedFeature("LOCAL INFILE".into()).is_connection_fatal());
        assert!(Error::ConnectionClosing.is_closed());
    }
}

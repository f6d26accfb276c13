// Client error taxonomy. The first fatal error is latched in the client and
// handed back to every caller, so the type is Clone with owned payloads.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("client already started")]
    AlreadyStarted,
    #[error("socket i/o: {0}")]
    Io(String),
    #[error("wire codec: {0}")]
    Codec(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("application exception: {0}")]
    RemoteException(String),
    #[error("client is stopped")]
    Stopped,
}

impl ClientError {
    pub(crate) fn io(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

impl From<keel_wire::Error> for ClientError {
    fn from(err: keel_wire::Error) -> Self {
        ClientError::Codec(err.to_string())
    }
}

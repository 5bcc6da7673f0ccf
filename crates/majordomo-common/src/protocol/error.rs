use thiserror::Error;

use super::envelope::EnvelopeError;

#[derive(Error, Debug)]
pub enum MajordomoError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("Malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Already started")]
    AlreadyStarted,

    #[error("Not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MajordomoError {
    /// Returns true for failures of the underlying connection, after which
    /// the socket must be dropped and re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, MajordomoError::Connection(_) | MajordomoError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MajordomoError>;

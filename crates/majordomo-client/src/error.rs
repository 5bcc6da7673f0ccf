use majordomo_common::protocol::RequestId;
use thiserror::Error;

/// Failure of one call, as seen by the caller.
///
/// These are the only errors that cross the RPC boundary; transport and
/// codec failures are recovered inside the client or surface as
/// [`RpcError::Protocol`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Client is not active (request {id})")]
    NotActive { id: RequestId },

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: RequestId, timeout_ms: u64 },

    #[error("Protocol error for request {id}: {message}")]
    Protocol { id: RequestId, message: String },

    #[error("Client shutting down (request {id})")]
    ShuttingDown { id: RequestId },
}

impl RpcError {
    pub fn request_id(&self) -> &RequestId {
        match self {
            RpcError::NotActive { id }
            | RpcError::Timeout { id, .. }
            | RpcError::Protocol { id, .. }
            | RpcError::ShuttingDown { id } => id,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::envelope::EnvelopeError;

/// Correlation token of one call.
///
/// Generated by the client (a v4 UUID in simple form), carried untouched by
/// the broker and the worker, and used by the client to match the reply to
/// its pending call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_frame(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, EnvelopeError> {
        std::str::from_utf8(frame)
            .map(|s| RequestId(s.to_string()))
            .map_err(|_| EnvelopeError::InvalidUtf8("request id"))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId(value)
    }
}

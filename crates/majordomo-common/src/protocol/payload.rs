//! Call and reply payload shapes
//!
//! Payload bodies travel as opaque bytes inside the envelope; this module
//! fixes their logical shape. Both serialize as sequences so that JSON and
//! MessagePack produce the positional wire form:
//!
//! - call: `[method, args, kwargs]`
//! - reply: `[success, resultOrErrorMessage]`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword arguments of a call.
pub type Kwargs = Map<String, Value>;

/// The `[method, args, kwargs]` body of a call.
///
/// # Example
///
/// ```
/// use majordomo_common::protocol::CallPayload;
/// use serde_json::json;
///
/// let call = CallPayload::new("ping", vec![], Default::default());
/// assert_eq!(serde_json::to_value(&call).unwrap(), json!(["ping", [], {}]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CallTuple", into = "CallTuple")]
pub struct CallPayload {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

#[derive(Serialize, Deserialize)]
struct CallTuple(String, #[serde(default)] Vec<Value>, #[serde(default)] Kwargs);

impl From<CallTuple> for CallPayload {
    fn from(CallTuple(method, args, kwargs): CallTuple) -> Self {
        Self {
            method,
            args,
            kwargs,
        }
    }
}

impl From<CallPayload> for CallTuple {
    fn from(call: CallPayload) -> Self {
        CallTuple(call.method, call.args, call.kwargs)
    }
}

impl CallPayload {
    pub fn new(method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs,
        }
    }
}

/// The `[success, resultOrErrorMessage]` body of a reply.
///
/// On failure `value` holds the remote error message as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReplyTuple", into = "ReplyTuple")]
pub struct ReplyPayload {
    pub success: bool,
    pub value: Value,
}

#[derive(Serialize, Deserialize)]
struct ReplyTuple(bool, Value);

impl From<ReplyTuple> for ReplyPayload {
    fn from(ReplyTuple(success, value): ReplyTuple) -> Self {
        Self { success, value }
    }
}

impl From<ReplyPayload> for ReplyTuple {
    fn from(reply: ReplyPayload) -> Self {
        ReplyTuple(reply.success, reply.value)
    }
}

impl ReplyPayload {
    pub fn ok(value: Value) -> Self {
        Self {
            success: true,
            value,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            value: Value::String(message.into()),
        }
    }

    /// Splits the reply into the returned value or the remote error message.
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.value)
        } else {
            match self.value {
                Value::String(message) => Err(message),
                other => Err(other.to_string()),
            }
        }
    }
}

pub mod builtin;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod requests;

pub use builtin::*;
pub use envelope::{ClientMessage, Command, EnvelopeError, Frames, Inbound, WorkerMessage};
pub use error::*;
pub use payload::{CallPayload, Kwargs, ReplyPayload};
pub use requests::RequestId;

#[cfg(test)]
mod tests;

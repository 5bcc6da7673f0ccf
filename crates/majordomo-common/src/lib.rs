//! Majordomo Common Types and Transport
//!
//! This crate provides the protocol definitions and the framed TCP transport
//! shared by the three parties of the majordomo request/reply system:
//!
//! - **Clients** issue correlated calls to a named service
//! - **Brokers** route each call to an idle worker of that service
//! - **Workers** register under one service, answer calls and heartbeat
//!
//! # Architecture
//!
//! - **Envelope**: ordered byte frames, `[address, "", signature, ...]`
//! - **Payload**: `[method, args, kwargs]` calls and `[success, value]` replies,
//!   serialized by a pluggable [`Codec`] (JSON or MessagePack)
//! - **Transport**: TCP carrying multipart messages
//!   (`[u32 frame count] ([u32 length] [bytes])*`, big-endian)
//! - **Liveness**: heartbeat timers and expiry tracking
//!
//! # Components
//!
//! - [`protocol`] - Envelope framing rules, payload shapes, built-in records
//! - [`transport`] - Dealer, router and publish/subscribe sockets
//! - [`codec`] - Payload codec
//! - [`liveness`] - Heartbeat interval and liveness expiry primitive
//! - [`config`] - Client, broker and worker configuration
//!
//! # Example
//!
//! ```
//! use majordomo_common::codec::Codec;
//! use majordomo_common::protocol::{CallPayload, RequestId};
//! use serde_json::json;
//!
//! let codec = Codec::Json;
//! let call = CallPayload::new("get_account", vec![json!("acc-1")], Default::default());
//! let bytes = codec.encode(&call).unwrap();
//! let decoded: CallPayload = codec.decode(&bytes).unwrap();
//! assert_eq!(call, decoded);
//!
//! let id = RequestId::new();
//! assert_eq!(id.as_str().len(), 32);
//! ```

pub mod codec;
pub mod config;
pub mod liveness;
pub mod protocol;
pub mod transport;

pub use codec::Codec;
pub use config::{BrokerConfig, ClientConfig, WorkerConfig};
pub use protocol::error::{MajordomoError, Result};
pub use protocol::*;

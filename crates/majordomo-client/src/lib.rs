//! Majordomo RPC Client
//!
//! [`RpcClient`] issues correlated calls to named services through a
//! majordomo broker, with per-call timeouts, heartbeating and automatic
//! reconnection. [`TopicSubscriber`] receives the broker's fan-out
//! notifications.

pub mod client;
pub mod error;
pub mod request_table;
pub mod subscriber;

pub use client::{ClientEvent, ClientStatus, RpcClient};
pub use error::{RpcError, RpcResult};
pub use request_table::{PendingRequest, ReplyKind, RequestTable};
pub use subscriber::TopicSubscriber;

//! Majordomo Transport Layer
//!
//! Framed TCP sockets carrying multipart messages.
//!
//! # Architecture
//!
//! - **Wire Format**: `[u32 frame count] ([u32 length] [bytes])*`, big-endian
//! - **Dealer**: one outbound connection, used by clients and workers
//! - **Router**: accepts many connections and addresses each by a routing
//!   identity, used by the broker
//! - **Publisher / Subscriber**: one-way topic fan-out from the broker
//!
//! # Message Size Limits
//!
//! All sockets enforce a maximum message size of 100 MB and at most 64
//! frames per message.
//!
//! # Example
//!
//! ```no_run
//! use majordomo_common::transport::{DealerSocket, RouterSocket};
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> majordomo_common::Result<()> {
//! let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await?;
//! let endpoint = format!("tcp://{}", router.local_addr());
//!
//! let mut dealer = DealerSocket::connect(&endpoint).await?;
//! dealer.send(&[Bytes::from_static(b"hello")]).await?;
//!
//! let message = router.recv().await?;
//! router.send(vec![message[0].clone(), Bytes::from_static(b"world")]).await?;
//! assert_eq!(dealer.recv().await?, vec![Bytes::from_static(b"world")]);
//! # Ok(())
//! # }
//! ```

pub mod dealer;
pub mod endpoint;
pub mod pubsub;
pub mod router;
pub mod wire;

pub use dealer::DealerSocket;
pub use endpoint::Endpoint;
pub use pubsub::{PublisherSocket, SubscriberSocket};
pub use router::RouterSocket;

#[cfg(test)]
mod tests;

//! Majordomo
//!
//! Brokered request/reply RPC over worker pools. Clients call a named
//! service through a broker, which hands each call to the next idle worker
//! registered for that service and relays the reply back.
//!
//! This crate re-exports the member crates:
//!
//! - [`common`] - envelope protocol, payload codec, transport, configuration
//! - [`client`] - [`RpcClient`] and the topic subscriber
//! - [`broker`] - [`Broker`] and its worker registry
//! - [`worker`] - [`Worker`] runtime and handler registry
//!
//! # Example
//!
//! ```no_run
//! use majordomo::{Broker, RpcClient, Worker};
//! use majordomo::common::{BrokerConfig, ClientConfig, WorkerConfig};
//! use majordomo::worker::HandlerError;
//! use serde_json::{json, Value};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let broker = Broker::bind(BrokerConfig::new("tcp://127.0.0.1:5555")).await?;
//!
//! let worker = Worker::builder(WorkerConfig::new(broker.endpoint(), "math"))
//!     .handler("square", |args: Vec<Value>, _kwargs| async move {
//!         let x = args.first().and_then(Value::as_i64).unwrap_or_default();
//!         Ok::<_, HandlerError>(json!(x * x))
//!     })
//!     .build();
//! worker.start().await?;
//!
//! let client = RpcClient::new(ClientConfig::new(broker.endpoint()));
//! client.start().await?;
//! let nine = client.call("math", "square", vec![json!(3)], Default::default()).await?;
//! assert_eq!(nine, json!(9));
//! # Ok(())
//! # }
//! ```

pub use majordomo_broker as broker;
pub use majordomo_client as client;
pub use majordomo_common as common;
pub use majordomo_worker as worker;

pub use majordomo_broker::Broker;
pub use majordomo_client::{RpcClient, RpcError, TopicSubscriber};
pub use majordomo_common::{MajordomoError, Result};
pub use majordomo_worker::{HandlerError, Worker};

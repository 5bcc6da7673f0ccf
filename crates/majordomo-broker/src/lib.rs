//! Majordomo Broker
//!
//! Routes client calls to pools of heartbeating workers grouped by service
//! name. Idle workers are served round-robin, calls for a service without an
//! idle worker wait in a per-service FIFO backlog, and workers that stop
//! heartbeating are evicted.

pub mod broker;
pub mod registry;
pub mod worker;

pub use broker::Broker;
pub use registry::{Dispatch, QueuedRequest, RegistryError, WorkerRegistry};
pub use worker::{WorkerEntry, WorkerState};

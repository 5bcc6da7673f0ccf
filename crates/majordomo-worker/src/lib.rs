//! Majordomo Worker
//!
//! Worker runtime for the majordomo broker. A [`Worker`] registers under one
//! service name, answers calls from a [`HandlerRegistry`] of async method
//! handlers and keeps itself registered across broker restarts.

pub mod handler;
pub mod worker;

pub use handler::{Handler, HandlerError, HandlerRegistry, HandlerResult};
pub use worker::{Worker, WorkerBuilder};

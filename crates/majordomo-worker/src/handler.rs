//! Method handlers
//!
//! A worker answers `(method, args, kwargs)` calls by looking the method up
//! in a [`HandlerRegistry`]. Any async function or closure taking
//! `(Vec<Value>, Kwargs)` and returning a [`HandlerResult`] is a
//! [`Handler`].
//!
//! # Example
//!
//! ```
//! use majordomo_worker::handler::{HandlerError, HandlerRegistry};
//! use serde_json::{json, Value};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("add", |args: Vec<Value>, _kwargs| async move {
//!     let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
//!     Ok::<_, HandlerError>(json!(sum))
//! });
//! assert!(registry.contains("add"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use majordomo_common::protocol::Kwargs;
use serde_json::Value;
use thiserror::Error;

/// Failure reported back to the caller as `[false, message]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        HandlerError::InvalidArguments(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidArguments(e.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Trait for method handlers.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> BoxFuture<'static, HandlerResult> {
        (self)(args, kwargs).boxed()
    }
}

/// Registry mapping method names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.insert(method, Arc::new(handler));
    }

    /// Registers an already shared handler.
    pub fn insert(&mut self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Looks up and runs `method`.
    pub async fn dispatch(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> HandlerResult {
        match self.get(method) {
            Some(handler) => handler.call(args, kwargs).await,
            None => Err(HandlerError::UnknownMethod(method.to_string())),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn echo(args: Vec<Value>, _kwargs: Kwargs) -> HandlerResult {
        Ok(Value::Array(args))
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_fn() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", echo);

        let result = registry
            .dispatch("echo", vec![json!(1), json!("two")], Kwargs::new())
            .await;
        assert_eq!(result, Ok(json!([1, "two"])));
    }

    #[tokio::test]
    async fn test_closure_with_kwargs() {
        let mut registry = HandlerRegistry::new();
        registry.register("greet", |_args: Vec<Value>, kwargs: Kwargs| async move {
            let name = kwargs
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::invalid_arguments("missing 'name'"))?;
            Ok::<_, HandlerError>(json!(format!("hello {}", name)))
        });

        let mut kwargs = Kwargs::new();
        kwargs.insert("name".to_string(), json!("ada"));
        assert_eq!(
            registry.dispatch("greet", vec![], kwargs).await,
            Ok(json!("hello ada"))
        );
        assert_eq!(
            registry.dispatch("greet", vec![], Kwargs::new()).await,
            Err(HandlerError::InvalidArguments("missing 'name'".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let registry = HandlerRegistry::new();
        let err = registry.dispatch("nope", vec![], Kwargs::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown method 'nope'");
    }

    #[test]
    fn test_register_replaces_and_lists_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("b", echo);
        registry.register("a", echo);
        registry.register("b", echo);
        assert_eq!(registry.methods(), vec!["a", "b"]);
    }

    #[test]
    fn test_serde_error_is_invalid_arguments() {
        let err: HandlerError = serde_json::from_str::<i64>("\"x\"").unwrap_err().into();
        assert!(matches!(err, HandlerError::InvalidArguments(_)));
    }
}

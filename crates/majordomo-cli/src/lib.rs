// Copyright 2025 Majordomo Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Majordomo CLI
//!
//! Command-line interface for the majordomo RPC system.
//!
//! This crate provides the main entry point for running majordomo components:
//!
//! - **Broker**: routes calls between clients and worker pools
//! - **Worker**: a demo `echo` service worker
//! - **Call**: one RPC call with raw JSON output
//! - **Subscribe**: prints the broker's fan-out notifications
//!
//! ## Endpoint resolution
//!
//! Endpoints given as flags win; otherwise `MAJORDOMO_BROKER_URL` and
//! `MAJORDOMO_PUBLISH_URL` are consulted, then the built-in defaults.

pub mod subscribe;

use anyhow::{anyhow, Result};
use majordomo_common::protocol::Kwargs;
use majordomo_common::WorkerConfig;
use majordomo_worker::{HandlerError, Worker};
use serde_json::Value;

/// Environment variable holding the broker's request endpoint
pub const BROKER_URL_ENV: &str = "MAJORDOMO_BROKER_URL";

/// Environment variable holding the broker's publish endpoint
pub const PUBLISH_URL_ENV: &str = "MAJORDOMO_PUBLISH_URL";

pub const DEFAULT_PUBLISH_URL: &str = "tcp://localhost:5556";

/// Picks the flag value, then the environment variable, then `default`.
pub fn resolve_url(flag: Option<String>, env_var: &str, default: &str) -> String {
    flag.or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// Parses positional call arguments given as a JSON array.
pub fn parse_args(json: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(json).map_err(|e| anyhow!("Invalid JSON in args: {}", e))? {
        Value::Array(args) => Ok(args),
        other => Err(anyhow!("args must be a JSON array, got {}", other)),
    }
}

/// Parses keyword call arguments given as a JSON object.
pub fn parse_kwargs(json: &str) -> Result<Kwargs> {
    match serde_json::from_str(json).map_err(|e| anyhow!("Invalid JSON in kwargs: {}", e))? {
        Value::Object(kwargs) => Ok(kwargs),
        other => Err(anyhow!("kwargs must be a JSON object, got {}", other)),
    }
}

/// Demo worker whose `echo` method returns its positional arguments.
pub fn echo_worker(config: WorkerConfig) -> Worker {
    Worker::builder(config)
        .handler("echo", |args: Vec<Value>, _kwargs| async move {
            Ok::<_, HandlerError>(Value::Array(args))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_url_precedence() {
        let var = "MAJORDOMO_TEST_RESOLVE_URL";
        std::env::remove_var(var);
        assert_eq!(resolve_url(None, var, "tcp://default:1"), "tcp://default:1");

        std::env::set_var(var, "tcp://from-env:2");
        assert_eq!(resolve_url(None, var, "tcp://default:1"), "tcp://from-env:2");
        assert_eq!(
            resolve_url(Some("tcp://flag:3".to_string()), var, "tcp://default:1"),
            "tcp://flag:3"
        );
        std::env::remove_var(var);
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args("[1, \"two\", {\"x\": null}]").unwrap(), vec![
            json!(1),
            json!("two"),
            json!({"x": null})
        ]);
        assert!(parse_args("[]").unwrap().is_empty());
        assert!(parse_args("{}").is_err());
        assert!(parse_args("[1,").is_err());
    }

    #[test]
    fn test_parse_kwargs() {
        let kwargs = parse_kwargs("{\"currency\": \"EUR\"}").unwrap();
        assert_eq!(kwargs.get("currency"), Some(&json!("EUR")));
        assert!(parse_kwargs("[]").is_err());
    }
}

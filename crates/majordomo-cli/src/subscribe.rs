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

use anyhow::Result;
use majordomo_client::TopicSubscriber;
use majordomo_common::Codec;
use serde_json::{json, Value};

/// Prints every publication matching `prefixes` as one JSON line until
/// Ctrl-C. No prefixes means everything.
pub async fn run_subscribe(endpoint: String, prefixes: Vec<String>) -> Result<()> {
    let mut subscriber = TopicSubscriber::connect(&endpoint, Codec::Json).await?;

    let prefixes = if prefixes.is_empty() {
        vec![String::new()]
    } else {
        prefixes
    };
    for prefix in &prefixes {
        subscriber.subscribe(prefix).await?;
    }
    tracing::info!("Subscribed to {:?} on {}", prefixes, endpoint);

    loop {
        tokio::select! {
            received = subscriber.recv_raw() => {
                let (topic, payload) = received?;
                println!("{}", format_publication(&topic, &payload));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Renders a publication as `{"topic": ..., "payload": ...}`.
///
/// A payload that is not JSON is shown as a (lossy) string.
pub fn format_publication(topic: &str, payload: &[u8]) -> String {
    let payload = serde_json::from_slice::<Value>(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
    json!({ "topic": topic, "payload": payload }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_payload_inlined() {
        let line = format_publication("quotes.EURUSD", br#"{"bid":1.08}"#);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"topic": "quotes.EURUSD", "payload": {"bid": 1.08}}));
    }

    #[test]
    fn test_raw_payload_as_string() {
        let line = format_publication("raw", b"not json");
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["payload"], json!("not json"));
    }
}

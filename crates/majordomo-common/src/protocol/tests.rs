//! Integration tests for the protocol module
//!
//! These tests verify payload shapes, request id generation and the
//! built-in record formats.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::{json, Map};
    use std::collections::HashSet;

    #[test]
    fn test_call_payload_wire_shape() {
        let mut kwargs = Map::new();
        kwargs.insert("limit".to_string(), json!(10));
        let call = CallPayload::new("list_orders", vec![json!("acc-1")], kwargs);

        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value, json!(["list_orders", ["acc-1"], {"limit": 10}]));
    }

    #[test]
    fn test_call_payload_missing_args_default_to_empty() {
        let call: CallPayload = serde_json::from_value(json!(["ping"])).unwrap();
        assert_eq!(call.method, "ping");
        assert!(call.args.is_empty());
        assert!(call.kwargs.is_empty());
    }

    #[test]
    fn test_call_payload_rejects_object_form() {
        let result = serde_json::from_value::<CallPayload>(json!({"method": "ping"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_payload_success() {
        let reply = ReplyPayload::ok(json!({"balance": 12.5}));
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!([true, {"balance": 12.5}]));
        assert_eq!(reply.into_result(), Ok(json!({"balance": 12.5})));
    }

    #[test]
    fn test_reply_payload_failure() {
        let reply = ReplyPayload::err("unknown method");
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!([false, "unknown method"]));
        assert_eq!(reply.into_result(), Err("unknown method".to_string()));
    }

    #[test]
    fn test_reply_failure_with_structured_value() {
        let reply: ReplyPayload = serde_json::from_value(json!([false, {"code": 7}])).unwrap();
        assert_eq!(reply.into_result(), Err(r#"{"code":7}"#.to_string()));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let ids: HashSet<_> = (0..1000).map(|_| RequestId::new()).collect();
        assert_eq!(ids.len(), 1000, "All request IDs should be unique");
    }

    #[test]
    fn test_request_id_frame_roundtrip() {
        let id = RequestId::new();
        let frame = id.to_frame();
        assert_eq!(RequestId::from_frame(&frame).unwrap(), id);
    }

    #[test]
    fn test_request_id_rejects_invalid_utf8() {
        let err = RequestId::from_frame(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err, EnvelopeError::InvalidUtf8("request id"));
    }

    #[test]
    fn test_health_record_omits_empty_message() {
        let record = HealthRecord::healthy("auth", 1200, 3);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("message").is_none());
        assert_eq!(value["healthy"], json!(true));

        let with_message = record.with_message("all good");
        let back: HealthRecord =
            serde_json::from_value(serde_json::to_value(&with_message).unwrap()).unwrap();
        assert_eq!(back.message.as_deref(), Some("all good"));
    }

    #[test]
    fn test_internal_service_prefix() {
        assert!(is_internal_service(MMI_SERVICE));
        assert!(is_internal_service("mmi.echo"));
        assert!(!is_internal_service("accounts"));
    }

    #[test]
    fn test_broker_stats_lookup() {
        let stats = BrokerStats {
            uptime_ms: 10,
            workers: 1,
            services: vec![ServiceStats {
                name: "auth".to_string(),
                idle_workers: 1,
                busy_workers: 0,
                backlog: 0,
            }],
            subscribers: 2,
        };
        assert_eq!(stats.service("auth").map(|s| s.idle_workers), Some(1));
        assert!(stats.service("missing").is_none());

        // Snapshots without a subscriber count still decode.
        let older: BrokerStats =
            serde_json::from_str(r#"{"uptime_ms":1,"workers":0,"services":[]}"#).unwrap();
        assert_eq!(older.subscribers, 0);
    }

    #[test]
    fn test_error_connection_lost_classification() {
        let io = MajordomoError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(io.is_connection_lost());
        assert!(MajordomoError::Connection("reset".into()).is_connection_lost());
        assert!(!MajordomoError::AlreadyStarted.is_connection_lost());
    }
}

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::protocol::error::Result;

/// Codec for payload bodies
///
/// The envelope carries payloads as opaque bytes; both ends of a call must
/// agree on the codec. JSON is the default, MessagePack is available for
/// compact binary payloads (structs are encoded as maps so field names
/// survive the round trip).
///
/// # Example
///
/// ```
/// use majordomo_common::codec::Codec;
/// use majordomo_common::protocol::ReplyPayload;
/// use serde_json::json;
///
/// let codec = Codec::MsgPack;
/// let reply = ReplyPayload::ok(json!({"n": 42}));
///
/// let encoded = codec.encode(&reply).unwrap();
/// let decoded: ReplyPayload = codec.decode(&encoded).unwrap();
/// assert_eq!(reply, decoded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    MsgPack,
}

impl Codec {
    /// Encode a value to bytes
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let bytes = match self {
            Codec::Json => serde_json::to_vec(value)?,
            Codec::MsgPack => rmp_serde::to_vec_named(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode a value from bytes
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(data)?),
            Codec::MsgPack => Ok(rmp_serde::from_slice(data)?),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::MsgPack => "msgpack",
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "msgpack" | "messagepack" => Ok(Codec::MsgPack),
            other => Err(format!("unknown codec '{}', expected json or msgpack", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallPayload, ReplyPayload};
    use serde_json::{json, Map};

    const CODECS: [Codec; 2] = [Codec::Json, Codec::MsgPack];

    #[test]
    fn test_call_with_empty_args() {
        let call = CallPayload::new("ping", vec![], Map::new());
        for codec in CODECS {
            let decoded: CallPayload = codec.decode(&codec.encode(&call).unwrap()).unwrap();
            assert_eq!(decoded, call, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_call_with_nested_kwargs() {
        let mut kwargs = Map::new();
        kwargs.insert(
            "filter".to_string(),
            json!({
                "nested": {
                    "array": [1, 2, 3, "four", null],
                    "boolean": true,
                    "number": 42.5
                }
            }),
        );
        let call = CallPayload::new("search", vec![json!(1), json!([true, false])], kwargs);

        for codec in CODECS {
            let decoded: CallPayload = codec.decode(&codec.encode(&call).unwrap()).unwrap();
            assert_eq!(decoded, call, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_call_with_unicode_strings() {
        let mut kwargs = Map::new();
        kwargs.insert("emoji".to_string(), json!("🚀 λ"));
        let call = CallPayload::new("überprüfen", vec![json!("日本語テキスト")], kwargs);

        for codec in CODECS {
            let decoded: CallPayload = codec.decode(&codec.encode(&call).unwrap()).unwrap();
            assert_eq!(decoded, call, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_reply_failure() {
        let reply = ReplyPayload::err("Division by zero");
        for codec in CODECS {
            let decoded: ReplyPayload = codec.decode(&codec.encode(&reply).unwrap()).unwrap();
            assert_eq!(decoded.into_result(), Err("Division by zero".to_string()));
        }
    }

    #[test]
    fn test_json_wire_is_positional() {
        let encoded = Codec::Json
            .encode(&CallPayload::new("ping", vec![], Map::new()))
            .unwrap();
        assert_eq!(encoded.as_ref(), br#"["ping",[],{}]"#);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Codec::Json.decode::<CallPayload>(b"not json").is_err());
        assert!(Codec::MsgPack.decode::<CallPayload>(&[0xc1]).is_err());
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("json".parse::<Codec>(), Ok(Codec::Json));
        assert_eq!("MsgPack".parse::<Codec>(), Ok(Codec::MsgPack));
        assert!("cbor".parse::<Codec>().is_err());
    }
}

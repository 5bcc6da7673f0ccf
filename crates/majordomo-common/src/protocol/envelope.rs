//! Envelope framing rules
//!
//! An envelope is one multipart message. On the broker's router socket every
//! envelope starts with the peer's routing address; on dealer sockets
//! (clients and workers) that frame is absent. Everything after it follows
//! one of two families, distinguished by the signature frame:
//!
//! ```text
//! client call / reply : ["", MDPC01, service, request-id, payload]
//! client heartbeat    : ["", 0x04]
//! worker READY        : ["", MDPW01, 0x01, service]
//! worker REQUEST      : ["", MDPW01, 0x02, client-address, request-id, payload]
//! worker REPLY        : ["", MDPW01, 0x03, client-address, request-id, payload]
//! worker HEARTBEAT    : ["", MDPW01, 0x04]
//! worker DISCONNECT   : ["", MDPW01, 0x05]
//! ```
//!
//! The signature and command fix the exact number of frames. Anything else
//! decodes to an [`EnvelopeError`]; callers log it and drop the message,
//! the connection stays up.

use bytes::Bytes;
use thiserror::Error;

use super::requests::RequestId;

/// One multipart message.
pub type Frames = Vec<Bytes>;

/// Client protocol signature.
pub const CLIENT_SIGNATURE: &[u8] = b"MDPC01";
/// Worker protocol signature.
pub const WORKER_SIGNATURE: &[u8] = b"MDPW01";

/// Frames of a client envelope: delimiter, signature, service, id, payload.
const CLIENT_FRAMES: usize = 5;
/// Frames preceding a worker command body: delimiter, signature, command.
const WORKER_HEADER_FRAMES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("expected at least {min} frames, got {actual}")]
    TooShort { min: usize, actual: usize },

    #[error("missing empty delimiter frame")]
    MissingDelimiter,

    #[error("unexpected protocol signature {0:?}")]
    BadSignature(String),

    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("{kind} expects {expected} frames, got {actual}")]
    FrameCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} frame is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// Worker protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Ready = 0x01,
    Request = 0x02,
    Reply = 0x03,
    Heartbeat = 0x04,
    Disconnect = 0x05,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Ready),
            0x02 => Some(Command::Request),
            0x03 => Some(Command::Reply),
            0x04 => Some(Command::Heartbeat),
            0x05 => Some(Command::Disconnect),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Ready => "READY",
            Command::Request => "REQUEST",
            Command::Reply => "REPLY",
            Command::Heartbeat => "HEARTBEAT",
            Command::Disconnect => "DISCONNECT",
        }
    }

    /// Number of frames following the command frame.
    pub fn body_frames(self) -> usize {
        match self {
            Command::Ready => 1,
            Command::Request | Command::Reply => 3,
            Command::Heartbeat | Command::Disconnect => 0,
        }
    }

    fn frame(self) -> Bytes {
        Bytes::copy_from_slice(&[self.as_byte()])
    }
}

/// Messages of the client family.
///
/// A call and the broker's reply to it share the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Call {
        service: String,
        request_id: RequestId,
        payload: Bytes,
    },
    Heartbeat,
}

/// Messages of the worker family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Ready {
        service: String,
    },
    Request {
        client: Bytes,
        request_id: RequestId,
        payload: Bytes,
    },
    Reply {
        client: Bytes,
        request_id: RequestId,
        payload: Bytes,
    },
    Heartbeat,
    Disconnect,
}

impl WorkerMessage {
    pub fn command(&self) -> Command {
        match self {
            WorkerMessage::Ready { .. } => Command::Ready,
            WorkerMessage::Request { .. } => Command::Request,
            WorkerMessage::Reply { .. } => Command::Reply,
            WorkerMessage::Heartbeat => Command::Heartbeat,
            WorkerMessage::Disconnect => Command::Disconnect,
        }
    }
}

/// A decoded envelope of either family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Client(ClientMessage),
    Worker(WorkerMessage),
}

/// Encodes a client-family message for a dealer socket.
pub fn encode_client(message: &ClientMessage) -> Frames {
    match message {
        ClientMessage::Call {
            service,
            request_id,
            payload,
        } => vec![
            Bytes::new(),
            Bytes::from_static(CLIENT_SIGNATURE),
            Bytes::copy_from_slice(service.as_bytes()),
            request_id.to_frame(),
            payload.clone(),
        ],
        ClientMessage::Heartbeat => vec![Bytes::new(), Command::Heartbeat.frame()],
    }
}

/// Encodes a worker-family message for a dealer socket.
pub fn encode_worker(message: &WorkerMessage) -> Frames {
    let mut frames = Vec::with_capacity(WORKER_HEADER_FRAMES + message.command().body_frames());
    frames.push(Bytes::new());
    frames.push(Bytes::from_static(WORKER_SIGNATURE));
    frames.push(message.command().frame());

    match message {
        WorkerMessage::Ready { service } => {
            frames.push(Bytes::copy_from_slice(service.as_bytes()));
        }
        WorkerMessage::Request {
            client,
            request_id,
            payload,
        }
        | WorkerMessage::Reply {
            client,
            request_id,
            payload,
        } => {
            frames.push(client.clone());
            frames.push(request_id.to_frame());
            frames.push(payload.clone());
        }
        WorkerMessage::Heartbeat | WorkerMessage::Disconnect => {}
    }

    frames
}

/// Prepends a routing address, producing a message for a router socket.
pub fn route(address: Bytes, mut frames: Frames) -> Frames {
    frames.insert(0, address);
    frames
}

/// Decodes a message received on a dealer socket as a client-family envelope.
pub fn decode_client(frames: &[Bytes]) -> Result<ClientMessage, EnvelopeError> {
    match decode(frames)? {
        Inbound::Client(message) => Ok(message),
        Inbound::Worker(_) => Err(EnvelopeError::BadSignature(
            String::from_utf8_lossy(WORKER_SIGNATURE).into_owned(),
        )),
    }
}

/// Decodes a message received on a dealer socket as a worker-family envelope.
pub fn decode_worker(frames: &[Bytes]) -> Result<WorkerMessage, EnvelopeError> {
    match decode(frames)? {
        Inbound::Worker(message) => Ok(message),
        Inbound::Client(_) => Err(EnvelopeError::BadSignature(
            String::from_utf8_lossy(CLIENT_SIGNATURE).into_owned(),
        )),
    }
}

/// Decodes a message received on a router socket: the routing address and
/// the envelope that follows it.
pub fn decode_routed(frames: &[Bytes]) -> Result<(Bytes, Inbound), EnvelopeError> {
    let (address, rest) = frames.split_first().ok_or(EnvelopeError::TooShort {
        min: 1,
        actual: 0,
    })?;
    Ok((address.clone(), decode(rest)?))
}

/// Decodes an envelope without routing address.
pub fn decode(frames: &[Bytes]) -> Result<Inbound, EnvelopeError> {
    // Heartbeats are recognised before any signature handling.
    if frames.len() == 2
        && frames[0].is_empty()
        && frames[1].as_ref() == [Command::Heartbeat.as_byte()]
    {
        return Ok(Inbound::Client(ClientMessage::Heartbeat));
    }

    if frames.len() < 3 {
        return Err(EnvelopeError::TooShort {
            min: 3,
            actual: frames.len(),
        });
    }
    if !frames[0].is_empty() {
        return Err(EnvelopeError::MissingDelimiter);
    }

    match frames[1].as_ref() {
        CLIENT_SIGNATURE => decode_client_call(frames).map(Inbound::Client),
        WORKER_SIGNATURE => decode_worker_command(frames).map(Inbound::Worker),
        other => Err(EnvelopeError::BadSignature(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

fn decode_client_call(frames: &[Bytes]) -> Result<ClientMessage, EnvelopeError> {
    if frames.len() != CLIENT_FRAMES {
        return Err(EnvelopeError::FrameCount {
            kind: "client call",
            expected: CLIENT_FRAMES,
            actual: frames.len(),
        });
    }

    Ok(ClientMessage::Call {
        service: utf8(&frames[2], "service")?,
        request_id: RequestId::from_frame(&frames[3])?,
        payload: frames[4].clone(),
    })
}

fn decode_worker_command(frames: &[Bytes]) -> Result<WorkerMessage, EnvelopeError> {
    let command = match frames[2].as_ref() {
        [byte] => Command::from_byte(*byte).ok_or(EnvelopeError::UnknownCommand(*byte))?,
        other => return Err(EnvelopeError::UnknownCommand(other.first().copied().unwrap_or(0))),
    };

    let body = &frames[WORKER_HEADER_FRAMES..];
    if body.len() != command.body_frames() {
        return Err(EnvelopeError::FrameCount {
            kind: command.name(),
            expected: WORKER_HEADER_FRAMES + command.body_frames(),
            actual: frames.len(),
        });
    }

    let message = match command {
        Command::Ready => WorkerMessage::Ready {
            service: utf8(&body[0], "service")?,
        },
        Command::Request => WorkerMessage::Request {
            client: body[0].clone(),
            request_id: RequestId::from_frame(&body[1])?,
            payload: body[2].clone(),
        },
        Command::Reply => WorkerMessage::Reply {
            client: body[0].clone(),
            request_id: RequestId::from_frame(&body[1])?,
            payload: body[2].clone(),
        },
        Command::Heartbeat => WorkerMessage::Heartbeat,
        Command::Disconnect => WorkerMessage::Disconnect,
    };

    Ok(message)
}

fn utf8(frame: &Bytes, what: &'static str) -> Result<String, EnvelopeError> {
    std::str::from_utf8(frame)
        .map(str::to_string)
        .map_err(|_| EnvelopeError::InvalidUtf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> Frames {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn test_client_call_encoding() {
        let message = ClientMessage::Call {
            service: "account".to_string(),
            request_id: RequestId::from("r1"),
            payload: Bytes::from_static(b"body"),
        };
        let encoded = encode_client(&message);
        assert_eq!(encoded, frames(&[b"", b"MDPC01", b"account", b"r1", b"body"]));
        assert_eq!(decode_client(&encoded).unwrap(), message);
    }

    #[test]
    fn test_client_heartbeat_is_two_frames() {
        let encoded = encode_client(&ClientMessage::Heartbeat);
        assert_eq!(encoded.len(), 2);
        assert_eq!(decode(&encoded).unwrap(), Inbound::Client(ClientMessage::Heartbeat));
    }

    #[test]
    fn test_worker_ready_encoding() {
        let encoded = encode_worker(&WorkerMessage::Ready {
            service: "auth".to_string(),
        });
        assert_eq!(encoded, frames(&[b"", b"MDPW01", &[0x01], b"auth"]));
    }

    #[test]
    fn test_routed_request_decoding() {
        let message = WorkerMessage::Reply {
            client: Bytes::from_static(b"\x00\x00\x00\x00\x07"),
            request_id: RequestId::from("abc"),
            payload: Bytes::from_static(b"[true,1]"),
        };
        let routed = route(Bytes::from_static(b"W1"), encode_worker(&message));
        assert_eq!(routed.len(), 7);

        let (address, inbound) = decode_routed(&routed).unwrap();
        assert_eq!(address.as_ref(), b"W1");
        assert_eq!(inbound, Inbound::Worker(message));
    }

    #[test]
    fn test_worker_heartbeat_and_disconnect_have_no_body() {
        for message in [WorkerMessage::Heartbeat, WorkerMessage::Disconnect] {
            let encoded = encode_worker(&message);
            assert_eq!(encoded.len(), 3);
            assert_eq!(decode_worker(&encoded).unwrap(), message);
        }
    }

    #[test]
    fn test_bad_signature_rejected() {
        let err = decode(&frames(&[b"", b"HTTP/1", b"x"])).unwrap_err();
        assert_eq!(err, EnvelopeError::BadSignature("HTTP/1".to_string()));
    }

    #[test]
    fn test_missing_delimiter_rejected() {
        let err = decode(&frames(&[b"x", b"MDPC01", b"svc", b"id", b"p"])).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingDelimiter);
    }

    #[test]
    fn test_short_client_call_rejected() {
        let err = decode(&frames(&[b"", b"MDPC01", b"svc", b"id"])).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::FrameCount {
                kind: "client call",
                expected: 5,
                actual: 4
            }
        );
    }

    #[test]
    fn test_extra_worker_frames_rejected() {
        let err = decode(&frames(&[b"", b"MDPW01", &[0x04], b"extra"])).unwrap_err();
        assert!(matches!(err, EnvelopeError::FrameCount { kind: "HEARTBEAT", .. }));
    }

    #[test]
    fn test_ready_without_service_rejected() {
        let err = decode(&frames(&[b"", b"MDPW01", &[0x01]])).unwrap_err();
        assert!(matches!(err, EnvelopeError::FrameCount { kind: "READY", .. }));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = decode(&frames(&[b"", b"MDPW01", &[0x09]])).unwrap_err();
        assert_eq!(err, EnvelopeError::UnknownCommand(0x09));
    }

    #[test]
    fn test_too_short_rejected() {
        let err = decode(&frames(&[b""])).unwrap_err();
        assert_eq!(err, EnvelopeError::TooShort { min: 3, actual: 1 });
        assert!(decode_routed(&[]).is_err());
    }

    #[test]
    fn test_wrong_family_rejected() {
        let worker = encode_worker(&WorkerMessage::Heartbeat);
        assert!(matches!(decode_client(&worker), Err(EnvelopeError::BadSignature(_))));
    }

    #[test]
    fn test_command_byte_mapping() {
        for byte in 1u8..=5 {
            let command = Command::from_byte(byte).unwrap();
            assert_eq!(command.as_byte(), byte);
        }
        assert_eq!(Command::from_byte(0), None);
    }
}

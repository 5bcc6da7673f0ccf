use bytes::Bytes;
use majordomo_common::codec::Codec;
use majordomo_common::protocol::error::Result;
use majordomo_common::transport::SubscriberSocket;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Receiver for the broker's out-of-band notifications.
///
/// Publications are `(topic, payload)` pairs; payloads are decoded with the
/// same codec the broker published them with.
pub struct TopicSubscriber {
    socket: SubscriberSocket,
    codec: Codec,
}

impl TopicSubscriber {
    /// Connects to the broker's publish endpoint.
    pub async fn connect(endpoint: &str, codec: Codec) -> Result<Self> {
        let socket = SubscriberSocket::connect(endpoint).await?;
        debug!("Subscriber connected to {}", endpoint);
        Ok(Self { socket, codec })
    }

    /// Receives publications whose topic starts with `prefix`.
    pub async fn subscribe(&mut self, prefix: &str) -> Result<()> {
        self.socket.subscribe(prefix).await
    }

    pub async fn unsubscribe(&mut self, prefix: &str) -> Result<()> {
        self.socket.unsubscribe(prefix).await
    }

    /// Next publication with its payload left encoded.
    pub async fn recv_raw(&mut self) -> Result<(String, Bytes)> {
        self.socket.recv().await
    }

    /// Next publication, decoded.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<(String, T)> {
        let (topic, payload) = self.socket.recv().await?;
        let value = self.codec.decode(&payload)?;
        Ok((topic, value))
    }
}

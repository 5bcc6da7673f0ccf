//! Integration tests for the transport layer
//!
//! These tests run real sockets on loopback endpoints.

#[cfg(test)]
mod tests {
    use crate::transport::{DealerSocket, PublisherSocket, RouterSocket, SubscriberSocket};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::net::{TcpSocket, TcpStream};
    use tokio::time::{sleep, timeout, Instant};

    fn frames(parts: &[&'static [u8]]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from_static(p)).collect()
    }

    /// Subscriptions are applied asynchronously; keep publishing until
    /// `expected` subscribers match.
    async fn publish_until_delivered(
        publisher: &PublisherSocket,
        topic: &str,
        payload: &'static [u8],
        expected: usize,
    ) {
        for _ in 0..100 {
            if publisher.publish(topic, Bytes::from_static(payload)).await >= expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("no subscriber matched topic {}", topic);
    }

    #[tokio::test]
    async fn test_router_prepends_identity() {
        let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", router.local_addr());

        let mut dealer = DealerSocket::connect(&endpoint).await.unwrap();
        dealer.send(&frames(&[b"", b"MDPC01"])).await.unwrap();

        let received = router.recv().await.unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].len(), 5);
        assert_eq!(received[0][0], 0x00);
        assert_eq!(&received[1..], &frames(&[b"", b"MDPC01"])[..]);
    }

    #[tokio::test]
    async fn test_router_routes_by_identity() {
        let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", router.local_addr());

        let mut first = DealerSocket::connect(&endpoint).await.unwrap();
        let mut second = DealerSocket::connect(&endpoint).await.unwrap();
        first.send(&frames(&[b"one"])).await.unwrap();
        second.send(&frames(&[b"two"])).await.unwrap();

        let mut identities = std::collections::HashMap::new();
        for _ in 0..2 {
            let message = router.recv().await.unwrap();
            identities.insert(message[1].clone(), message[0].clone());
        }
        assert_ne!(identities[&Bytes::from_static(b"one")], identities[&Bytes::from_static(b"two")]);

        router
            .send(vec![identities[&Bytes::from_static(b"two")].clone(), Bytes::from_static(b"for-two")])
            .await
            .unwrap();
        router
            .send(vec![identities[&Bytes::from_static(b"one")].clone(), Bytes::from_static(b"for-one")])
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap(), frames(&[b"for-one"]));
        assert_eq!(second.recv().await.unwrap(), frames(&[b"for-two"]));
    }

    #[tokio::test]
    async fn test_router_drops_unknown_identity() {
        let router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let result = router
            .send(vec![Bytes::from_static(b"\x00\xff\xff\xff\xff"), Bytes::from_static(b"x")])
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_router_forgets_closed_peer() {
        let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", router.local_addr());

        let mut dealer = DealerSocket::connect(&endpoint).await.unwrap();
        dealer.send(&frames(&[b"hi"])).await.unwrap();
        router.recv().await.unwrap();
        assert_eq!(router.peer_count().await, 1);

        drop(dealer);
        for _ in 0..100 {
            if router.peer_count().await == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("closed peer was not forgotten");
    }

    #[tokio::test]
    async fn test_dealer_reports_closed_connection() {
        let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", router.local_addr());
        let mut dealer = DealerSocket::connect(&endpoint).await.unwrap();
        dealer.send(&frames(&[b"hi"])).await.unwrap();
        router.recv().await.unwrap();

        drop(router);
        let err = timeout(Duration::from_secs(2), dealer.recv())
            .await
            .expect("recv should fail promptly")
            .unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_router_close_flushes_queued_messages() {
        let mut router = RouterSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", router.local_addr());
        let mut dealer = DealerSocket::connect(&endpoint).await.unwrap();
        dealer.send(&frames(&[b"hello"])).await.unwrap();
        let identity = router.recv().await.unwrap().remove(0);

        for n in 0..10u8 {
            router
                .send(vec![identity.clone(), Bytes::copy_from_slice(&[n])])
                .await
                .unwrap();
        }
        router.close().await;

        for n in 0..10u8 {
            let received = timeout(Duration::from_secs(2), dealer.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received, vec![Bytes::copy_from_slice(&[n])]);
        }
        let err = timeout(Duration::from_secs(2), dealer.recv())
            .await
            .expect("connection should close after the queue")
            .unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_dealer_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = DealerSocket::connect(&format!("tcp://{}", addr)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dealer_connect_is_bounded_when_accept_queue_full() {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        // Never accepted: once the queue is full further handshakes stall.
        let mut backlog = Vec::new();
        for _ in 0..4 {
            if let Ok(Ok(stream)) = timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
                backlog.push(stream);
            }
        }

        let limit = Duration::from_millis(200);
        let started = Instant::now();
        let result = DealerSocket::connect_timeout(&format!("tcp://{}", addr), limit).await;
        assert!(started.elapsed() < Duration::from_secs(1), "connect took {:?}", started.elapsed());
        if let Err(e) = result {
            assert!(e.is_connection_lost(), "unexpected error: {}", e);
        }
        drop(listener);
    }

    #[tokio::test]
    async fn test_pubsub_prefix_filtering() {
        let publisher = PublisherSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", publisher.local_addr());

        let mut quotes = SubscriberSocket::connect(&endpoint).await.unwrap();
        quotes.subscribe("quotes.").await.unwrap();
        let mut everything = SubscriberSocket::connect(&endpoint).await.unwrap();
        everything.subscribe("").await.unwrap();

        publish_until_delivered(&publisher, "quotes.EURUSD", b"1.08", 2).await;
        let (topic, payload) = quotes.recv().await.unwrap();
        assert_eq!(topic, "quotes.EURUSD");
        assert_eq!(payload.as_ref(), b"1.08");

        // Earlier attempts may have reached one subscriber already.
        publisher.publish("orders.filled", Bytes::from_static(b"42")).await;
        loop {
            let (topic, _) = everything.recv().await.unwrap();
            if topic == "orders.filled" {
                break;
            }
        }

        let nothing = timeout(Duration::from_millis(100), async {
            loop {
                let (topic, _) = quotes.recv().await.unwrap();
                if topic != "quotes.EURUSD" {
                    return topic;
                }
            }
        })
        .await;
        assert!(nothing.is_err(), "quotes subscriber received a non-matching topic");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let publisher = PublisherSocket::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = format!("tcp://{}", publisher.local_addr());

        let mut subscriber = SubscriberSocket::connect(&endpoint).await.unwrap();
        subscriber.subscribe("news").await.unwrap();
        publish_until_delivered(&publisher, "news", b"first", 1).await;
        subscriber.recv().await.unwrap();

        subscriber.unsubscribe("news").await.unwrap();
        for _ in 0..100 {
            if publisher.publish("news", Bytes::from_static(b"late")).await == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("unsubscribe never took effect");
    }
}

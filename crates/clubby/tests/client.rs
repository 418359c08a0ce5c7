use std::sync::Arc;
use std::time::Duration;

use clubby::prelude::*;
use clubby::{ClubbyConfig, Transport, TransportError};
use serde_json::{Value, json};

fn config() -> ClubbyConfig {
    ClubbyBuilder::new()
        .device("//api.cesanta.com/d/test", "psk")
        .timeout_secs(30)
        .build()
        .unwrap()
}

#[tokio::test]
async fn backend_request_over_mem_transport() {
    let (transport, peer) = Transport::mem_pair();
    let clubby = Clubby::with_transport(config(), transport);
    assert_eq!(clubby.backend(), "//api.cesanta.com");

    clubby.connect_and_wait().await.unwrap();
    assert!(clubby.is_connected());
    // Already connected.
    clubby.connect_and_wait().await.unwrap();
    assert_eq!(clubby.listener_count(), 0);

    let reply = clubby
        .request_backend::<_, Value>("/v1/Hello", &json!({"name": "test"}), None)
        .unwrap();

    let frame = peer.recv_envelope().await.unwrap().unwrap();
    assert_eq!(frame.src, "//api.cesanta.com/d/test");
    assert_eq!(frame.dst, "//api.cesanta.com");
    assert_eq!(frame.key.as_deref(), Some("psk"));
    let cmd = &frame.commands()[0];
    assert_eq!(cmd.timeout_secs, Some(30));

    peer.send_text(
        json!({"resp": [{"id": cmd.id, "status": 0, "resp": {"hello": "test"}}]}).to_string(),
    );
    assert_eq!(reply.await.unwrap(), json!({"hello": "test"}));

    clubby.close().await.unwrap();
    assert_eq!(clubby.current_state(), ConnectionState::NotConnected);
    // Closing twice is harmless.
    clubby.close().await.unwrap();
}

#[tokio::test]
async fn refused_connect_is_reported() {
    let (transport, peer) = Transport::mem_pair();
    let clubby = Clubby::with_transport(config(), transport);
    peer.refuse_next_connect("server busy");

    let err = clubby.connect_and_wait().await.unwrap_err();
    assert!(matches!(err, TransportError::Connect(ref reason) if reason == "server busy"));
    assert!(!clubby.is_connected());

    let err = clubby
        .request_backend::<_, Value>("/v1/Hello", &(), None)
        .unwrap_err();
    assert!(matches!(err, ClubbyError::NotConnected));
    clubby.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_applies_to_calls() {
    let (transport, peer) = Transport::mem_pair();
    let config = ClubbyBuilder::new().timeout_secs(2).build().unwrap();
    let clubby = Clubby::with_transport(config, transport);
    clubby.connect_and_wait().await.unwrap();

    let reply = clubby
        .request_backend::<_, Value>("/v1/Slow", &(), None)
        .unwrap();
    assert_eq!(
        peer.recv_envelope().await.unwrap().unwrap().commands()[0].timeout_secs,
        Some(2)
    );

    let err = reply.await.unwrap_err();
    assert!(err.is_timeout());
    clubby.close().await.unwrap();
}

#[tokio::test]
async fn dropping_the_client_stops_its_event_loop() {
    let (transport, _peer) = Transport::mem_pair();
    let clubby = Clubby::with_transport(config(), transport);
    clubby.connect_and_wait().await.unwrap();
    let session = Arc::downgrade(clubby.session());

    drop(clubby);
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.strong_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("event loop released the session");
}

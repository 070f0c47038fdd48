#![cfg(feature = "ws-stream")]

use alloy::primitives::B256;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use strike_engine::rpc_manager::{Endpoint, EndpointKind};
use strike_engine::sniffer::StreamError;
use strike_engine::streaming::websocket_stream::WebSocketConnector;
use strike_engine::streaming::{StreamConnector, StreamEvent};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Single-connection node stand-in: confirms the subscription (or refuses
/// it), pushes `hashes`, then closes.
async fn spawn_node(refuse: bool, hashes: Vec<B256>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let request = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text).unwrap(),
                Some(Ok(_)) => continue,
                _ => return,
            }
        };
        assert_eq!(request["method"], "eth_subscribe");
        assert_eq!(request["params"][0], "newPendingTransactions");

        // Unrelated traffic before the reply must be skipped
        ws.send(Message::Text(json!({"jsonrpc": "2.0", "id": 99, "result": true}).to_string()))
            .await
            .unwrap();

        let reply = if refuse {
            json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32601, "message": "method not found"}})
        } else {
            json!({"jsonrpc": "2.0", "id": request["id"], "result": "0xabc"})
        };
        ws.send(Message::Text(reply.to_string())).await.unwrap();
        if refuse {
            return;
        }

        for hash in hashes {
            let note = json!({
                "jsonrpc": "2.0",
                "method": "eth_subscription",
                "params": {"subscription": "0xabc", "result": format!("{:#x}", hash)},
            });
            ws.send(Message::Text(note.to_string())).await.unwrap();
        }
        let _ = ws.close(None).await;
    });

    format!("ws://{}", addr)
}

#[tokio::test]
async fn test_subscribe_receive_and_close() {
    let hashes = vec![B256::repeat_byte(1), B256::repeat_byte(2)];
    let url = spawn_node(false, hashes.clone()).await;

    let connector = WebSocketConnector::new(Duration::from_secs(5));
    let mut stream = connector
        .connect(&Endpoint::new(url, EndpointKind::Streaming))
        .await
        .expect("subscription should be confirmed");

    assert_eq!(stream.next_event().await, StreamEvent::PendingTransaction(hashes[0]));
    assert_eq!(stream.next_event().await, StreamEvent::PendingTransaction(hashes[1]));
    assert!(matches!(stream.next_event().await, StreamEvent::Closed(_)));
}

#[tokio::test]
async fn test_refused_subscription_is_handshake_error() {
    let url = spawn_node(true, vec![]).await;
    let connector = WebSocketConnector::new(Duration::from_secs(5));

    let err = connector
        .connect(&Endpoint::new(url, EndpointKind::Streaming))
        .await
        .err()
        .expect("refusal must fail the connect");
    assert!(matches!(err, StreamError::Handshake { ref message, .. } if message == "method not found"));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connect_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WebSocketConnector::new(Duration::from_secs(5));
    let err = connector
        .connect(&Endpoint::new(format!("ws://{}", addr), EndpointKind::Streaming))
        .await
        .err()
        .expect("nothing is listening");
    assert!(matches!(err, StreamError::Connect { .. }));
}

#[tokio::test]
async fn test_non_websocket_url_rejected() {
    let connector = WebSocketConnector::default();
    let err = connector
        .connect(&Endpoint::new("https://mainnet.base.org", EndpointKind::Streaming))
        .await
        .err()
        .unwrap();
    assert_eq!(err, StreamError::InvalidEndpoint("https://mainnet.base.org".to_string()));
}

//! WebSocket subscription to pending transactions
//!
//! Uses the standard `eth_subscribe` / `newPendingTransactions` call, which
//! every mainstream node and hosted provider supports. Notifications carry
//! either a bare hash or, on some providers, a full transaction object.

use super::{PendingTxStream, StreamConnector, StreamEvent};
use crate::rpc_manager::Endpoint;
use crate::sniffer::errors::StreamError;
use alloy::primitives::B256;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }

    async fn open(&self, url: &str) -> Result<(WsStream, String), StreamError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(StreamError::InvalidEndpoint(url.to_string()));
        }

        let (mut ws, _response) = connect_async(url).await.map_err(|e| StreamError::Connect {
            endpoint: url.to_string(),
            message: e.to_string(),
        })?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": "eth_subscribe",
            "params": ["newPendingTransactions"],
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| StreamError::Connect {
                endpoint: url.to_string(),
                message: e.to_string(),
            })?;

        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(|e| StreamError::Connect {
                endpoint: url.to_string(),
                message: e.to_string(),
            })?;
            let Message::Text(text) = frame else {
                continue;
            };
            match parse_subscribe_response(&text, SUBSCRIBE_REQUEST_ID) {
                Some(Ok(subscription)) => return Ok((ws, subscription)),
                Some(Err(message)) => {
                    return Err(StreamError::Handshake {
                        endpoint: url.to_string(),
                        message,
                    })
                }
                None => continue,
            }
        }

        Err(StreamError::Handshake {
            endpoint: url.to_string(),
            message: "closed before subscription was confirmed".to_string(),
        })
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PendingTxStream>, StreamError> {
        info!(endpoint = %endpoint.url, "Connecting to WebSocket");

        let (ws, subscription) = tokio::time::timeout(self.handshake_timeout, self.open(&endpoint.url))
            .await
            .map_err(|_| StreamError::Timeout {
                endpoint: endpoint.url.clone(),
                timeout_ms: self.handshake_timeout.as_millis() as u64,
            })??;

        info!(endpoint = %endpoint.url, subscription = %subscription, "Subscribed to pending transactions");
        Ok(Box::new(WebSocketPendingStream { ws, subscription }))
    }
}

struct WebSocketPendingStream {
    ws: WsStream,
    subscription: String,
}

#[async_trait]
impl PendingTxStream for WebSocketPendingStream {
    async fn next_event(&mut self) -> StreamEvent {
        loop {
            match self.ws.next().await {
                None => return StreamEvent::Closed(None),
                Some(Err(e)) => return StreamEvent::Closed(Some(e.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    return StreamEvent::Closed(frame.map(|f| f.reason.to_string()))
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(hash) = parse_pending_notification(&text, &self.subscription) {
                        return StreamEvent::PendingTransaction(hash);
                    }
                    debug!(len = text.len(), "Ignoring unrelated WebSocket message");
                }
                // Pings are answered by tungstenite on the next read
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Match the reply to our `eth_subscribe` request.
///
/// `None` for unrelated frames, `Some(Ok(id))` on success, `Some(Err(msg))`
/// when the endpoint refused.
pub fn parse_subscribe_response(text: &str, request_id: u64) -> Option<Result<String, String>> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("id").and_then(Value::as_u64) != Some(request_id) {
        return None;
    }
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("subscription refused")
            .to_string();
        return Some(Err(message));
    }
    match value.get("result").and_then(Value::as_str) {
        Some(id) => Some(Ok(id.to_string())),
        None => Some(Err("subscription reply without id".to_string())),
    }
}

/// Extract the pending transaction hash from an `eth_subscription` notification
pub fn parse_pending_notification(text: &str, subscription: &str) -> Option<B256> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = value.get("params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription) {
        return None;
    }
    let result = params.get("result")?;
    let hash = match result {
        Value::String(s) => s.as_str(),
        Value::Object(_) => result.get("hash")?.as_str()?,
        _ => return None,
    };
    hash.parse().ok()
}

//! Pending-transaction streaming sources
//!
//! A connector opens one subscription against a streaming endpoint; the
//! resulting stream yields hashes until the transport closes.

#[cfg(feature = "ws-stream")]
pub mod websocket_stream;

use crate::rpc_manager::Endpoint;
use crate::sniffer::errors::StreamError;
use alloy::primitives::B256;
use async_trait::async_trait;

/// Streaming update event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Hash of a transaction that entered the pending pool
    PendingTransaction(B256),
    /// Transport closed or errored; carries the reason when known
    Closed(Option<String>),
}

/// One live subscription
#[async_trait]
pub trait PendingTxStream: Send {
    /// Next event. After `Closed` the stream must not be polled again.
    async fn next_event(&mut self) -> StreamEvent;
}

/// Opens subscriptions
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PendingTxStream>, StreamError>;
}

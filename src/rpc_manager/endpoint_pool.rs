//! Endpoint pool with independent rotation per endpoint kind
//!
//! The pool holds two fixed, non-empty, ordered lists: request-response RPC
//! endpoints and streaming (websocket) endpoints. Each list has its own
//! cursor; `advance` moves it to the next entry, wrapping around.
//!
//! Selection is read at the start of each operation and never held across a
//! session, so cursors are plain atomics with no further coordination.

use super::rpc_errors::RpcManagerError;
use crate::metrics::metrics;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Endpoint kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// JSON-RPC over HTTP
    RequestResponse,
    /// Pending-transaction subscription over websocket
    Streaming,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::RequestResponse => "request_response",
            EndpointKind::Streaming => "streaming",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a single endpoint. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Ordered endpoint lists with one rotation cursor each
#[derive(Debug)]
pub struct EndpointPool {
    request_response: NonEmpty<Endpoint>,
    streaming: NonEmpty<Endpoint>,
    request_response_cursor: AtomicUsize,
    streaming_cursor: AtomicUsize,
}

impl EndpointPool {
    /// Create a pool from URL lists. Both lists must be non-empty.
    pub fn new<I, J>(rpc_urls: I, ws_urls: J) -> Result<Self, RpcManagerError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        let request_response = Self::collect(rpc_urls, EndpointKind::RequestResponse)?;
        let streaming = Self::collect(ws_urls, EndpointKind::Streaming)?;

        info!(
            request_response = request_response.len(),
            streaming = streaming.len(),
            "Endpoint pool initialized"
        );

        Ok(Self {
            request_response,
            streaming,
            request_response_cursor: AtomicUsize::new(0),
            streaming_cursor: AtomicUsize::new(0),
        })
    }

    fn collect<I>(urls: I, kind: EndpointKind) -> Result<NonEmpty<Endpoint>, RpcManagerError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let endpoints: Vec<Endpoint> = urls
            .into_iter()
            .map(Into::into)
            .map(|url: String| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .map(|url| Endpoint::new(url, kind))
            .collect();

        NonEmpty::from_vec(endpoints).ok_or_else(|| {
            RpcManagerError::Configuration(format!("no {} endpoints configured", kind))
        })
    }

    fn list(&self, kind: EndpointKind) -> &NonEmpty<Endpoint> {
        match kind {
            EndpointKind::RequestResponse => &self.request_response,
            EndpointKind::Streaming => &self.streaming,
        }
    }

    fn cursor(&self, kind: EndpointKind) -> &AtomicUsize {
        match kind {
            EndpointKind::RequestResponse => &self.request_response_cursor,
            EndpointKind::Streaming => &self.streaming_cursor,
        }
    }

    /// Endpoint at the current cursor for `kind`
    pub fn current(&self, kind: EndpointKind) -> &Endpoint {
        let list = self.list(kind);
        let idx = self.cursor(kind).load(Ordering::Acquire);
        // Cursor is only ever stored reduced modulo len
        list.get(idx).unwrap_or(list.first())
    }

    /// Current cursor position for `kind`
    pub fn current_index(&self, kind: EndpointKind) -> usize {
        self.cursor(kind).load(Ordering::Acquire)
    }

    /// Rotate `kind` to its next endpoint, wrapping around, and return it
    pub fn advance(&self, kind: EndpointKind) -> &Endpoint {
        let list = self.list(kind);
        let len = list.len();
        let previous = self
            .cursor(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idx| {
                Some((idx + 1) % len)
            })
            .unwrap_or_else(|idx| idx);
        let next_idx = (previous + 1) % len;
        let next = list.get(next_idx).unwrap_or(list.first());

        metrics()
            .endpoint_rotations
            .with_label_values(&[kind.as_str()])
            .inc();
        info!(
            kind = %kind,
            index = next_idx,
            endpoint = %next.url,
            "Rotated endpoint"
        );

        next
    }

    /// Number of configured endpoints for `kind`
    pub fn len(&self, kind: EndpointKind) -> usize {
        self.list(kind).len()
    }

    /// Rotate the request-response list when `err` is an endpoint fault:
    /// unreachable, timed out, throttled, malformed or a server-side error.
    /// Request-level rejections leave the cursor alone. Returns whether the
    /// cursor moved.
    pub fn rotate_on_error(&self, err: &RpcManagerError) -> bool {
        if !err.is_retryable() {
            return false;
        }
        warn!(
            endpoint = err.endpoint().unwrap_or("unknown"),
            reason = err.label(),
            "Request-response endpoint failed"
        );
        self.advance(EndpointKind::RequestResponse);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn pool(rpc: usize, ws: usize) -> EndpointPool {
        EndpointPool::new(
            (0..rpc).map(|i| format!("https://rpc{}.example", i)),
            (0..ws).map(|i| format!("wss://ws{}.example", i)),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_lists_rejected() {
        let err = EndpointPool::new(Vec::<String>::new(), vec!["wss://a"]).unwrap_err();
        assert!(matches!(err, RpcManagerError::Configuration(_)));

        let err = EndpointPool::new(vec!["https://a"], vec!["   "]).unwrap_err();
        assert!(matches!(err, RpcManagerError::Configuration(_)));
    }

    #[test]
    fn test_kinds_rotate_independently() {
        let pool = pool(3, 2);
        assert_eq!(pool.current(EndpointKind::RequestResponse).url, "https://rpc0.example");
        assert_eq!(pool.current(EndpointKind::Streaming).url, "wss://ws0.example");

        assert_eq!(pool.advance(EndpointKind::Streaming).url, "wss://ws1.example");
        assert_eq!(pool.current(EndpointKind::RequestResponse).url, "https://rpc0.example");

        assert_eq!(pool.advance(EndpointKind::Streaming).url, "wss://ws0.example");
        assert_eq!(pool.current(EndpointKind::Streaming).kind, EndpointKind::Streaming);
    }

    #[test]
    fn test_single_endpoint_rotation_is_noop() {
        let pool = pool(1, 1);
        let first = pool.current(EndpointKind::RequestResponse).clone();
        assert_eq!(pool.advance(EndpointKind::RequestResponse), &first);
        assert_eq!(pool.current_index(EndpointKind::RequestResponse), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_advances_keep_cursor_valid() {
        let pool = Arc::new(pool(3, 1));
        let mut handles = vec![];
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    pool.advance(EndpointKind::RequestResponse);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 320 rotations over 3 endpoints
        assert_eq!(pool.current_index(EndpointKind::RequestResponse), 320 % 3);
    }

    fn endpoint_faults() -> Vec<RpcManagerError> {
        vec![
            RpcManagerError::Transport {
                endpoint: "https://rpc0.example".to_string(),
                message: "connection refused".to_string(),
            },
            RpcManagerError::Timeout {
                endpoint: "https://rpc0.example".to_string(),
                timeout_ms: 10_000,
            },
            RpcManagerError::MalformedResponse {
                endpoint: "https://rpc0.example".to_string(),
                message: "missing result".to_string(),
            },
            RpcManagerError::RateLimitExceeded {
                endpoint: "https://rpc0.example".to_string(),
            },
            RpcManagerError::from_http_status("https://rpc0.example", 502, "bad gateway"),
        ]
    }

    #[test]
    fn test_every_endpoint_fault_rotates_request_response() {
        for err in endpoint_faults() {
            let pool = pool(3, 2);
            assert!(pool.rotate_on_error(&err), "{} should rotate", err.label());
            assert_eq!(pool.current_index(EndpointKind::RequestResponse), 1);
            assert_eq!(pool.current_index(EndpointKind::Streaming), 0);
        }
    }

    #[test]
    fn test_request_rejections_keep_endpoint() {
        let pool = pool(3, 1);
        for err in [
            RpcManagerError::NonceConflict {
                endpoint: "https://rpc0.example".to_string(),
                message: "nonce too low".to_string(),
            },
            RpcManagerError::InsufficientFunds {
                endpoint: "https://rpc0.example".to_string(),
            },
            RpcManagerError::classify("https://rpc0.example", Some(-32602), "invalid argument 0"),
        ] {
            assert!(!pool.rotate_on_error(&err));
        }
        assert_eq!(pool.current_index(EndpointKind::RequestResponse), 0);
    }

    proptest! {
        #[test]
        fn prop_rotation_is_cyclic(len in 1usize..8, k in 0usize..40) {
            let a = pool(len, 1);
            let b = pool(len, 1);
            for _ in 0..k {
                a.advance(EndpointKind::RequestResponse);
            }
            for _ in 0..(k + len) {
                b.advance(EndpointKind::RequestResponse);
            }
            prop_assert_eq!(
                a.current(EndpointKind::RequestResponse),
                b.current(EndpointKind::RequestResponse)
            );
            prop_assert!(a.current_index(EndpointKind::RequestResponse) < len);
        }
    }
}

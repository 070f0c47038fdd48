//! JSON-RPC over HTTP against the current request-response endpoint

use super::endpoint_pool::{EndpointKind, EndpointPool};
use super::rpc_errors::{RpcManagerError, RpcResult};
use super::ChainRpc;
use crate::metrics::metrics;
use crate::types::{TxDescriptor, TxReceipt};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// `ChainRpc` implementation backed by `reqwest`
#[derive(Debug)]
pub struct HttpChainRpc {
    pool: Arc<EndpointPool>,
    client: reqwest::Client,
    timeout_ms: u64,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(pool: Arc<EndpointPool>, timeout: Duration) -> RpcResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcManagerError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            pool,
            client,
            timeout_ms: timeout.as_millis() as u64,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and return the raw `result` member.
    ///
    /// A JSON `null` result is returned as `Value::Null` so lookups can tell
    /// "not found" apart from errors.
    async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let endpoint = self.pool.current(EndpointKind::RequestResponse).url.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(endpoint = %endpoint, method, id, "JSON-RPC request");
        let started = Instant::now();

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcManagerError::from_transport(&endpoint, &e, self.timeout_ms))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcManagerError::from_transport(&endpoint, &e, self.timeout_ms))?;

        metrics()
            .rpc_latency
            .observe(started.elapsed().as_secs_f64());

        if !status.is_success() {
            return Err(RpcManagerError::from_http_status(
                &endpoint,
                status.as_u16(),
                &text,
            ));
        }

        let mut envelope: Value =
            serde_json::from_str(&text).map_err(|e| RpcManagerError::MalformedResponse {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            debug!(endpoint = %endpoint, method, code = ?code, message, "JSON-RPC error");
            return Err(RpcManagerError::classify(&endpoint, code, message));
        }

        match envelope.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(RpcManagerError::MalformedResponse {
                endpoint,
                message: "response has neither result nor error".to_string(),
            }),
        }
    }

    fn current_endpoint(&self) -> String {
        self.pool.current(EndpointKind::RequestResponse).url.clone()
    }

    fn malformed(&self, message: impl Into<String>) -> RpcManagerError {
        RpcManagerError::MalformedResponse {
            endpoint: self.current_endpoint(),
            message: message.into(),
        }
    }

    fn quantity_u64(&self, value: &Value, field: &str) -> RpcResult<u64> {
        value
            .as_str()
            .and_then(parse_quantity_u64)
            .ok_or_else(|| self.malformed(format!("{} is not a hex quantity: {}", field, value)))
    }

    fn quantity_u256(&self, value: &Value, field: &str) -> RpcResult<U256> {
        value
            .as_str()
            .and_then(parse_quantity_u256)
            .ok_or_else(|| self.malformed(format!("{} is not a hex quantity: {}", field, value)))
    }

    fn hash_field(&self, value: &Value, field: &str) -> RpcResult<B256> {
        value
            .as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| self.malformed(format!("{} is not a 32-byte hash: {}", field, value)))
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x")?;
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

pub fn parse_quantity_u256(s: &str) -> Option<U256> {
    let digits = s.strip_prefix("0x")?;
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

fn optional_address(value: Option<&Value>) -> Option<Address> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Address>().ok())
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn transaction_count(&self, address: Address) -> RpcResult<u64> {
        let result = self
            .call(
                "eth_getTransactionCount",
                json!([format!("{:#x}", address), "pending"]),
            )
            .await?;
        self.quantity_u64(&result, "transaction count")
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<B256> {
        let result = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        self.hash_field(&result, "transaction hash")
    }

    async fn transaction_by_hash(&self, hash: B256) -> RpcResult<Option<TxDescriptor>> {
        let result = self
            .call("eth_getTransactionByHash", json!([format!("{:#x}", hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let value = match result.get("value") {
            Some(v) => self.quantity_u256(v, "value")?,
            None => U256::ZERO,
        };

        Ok(Some(TxDescriptor {
            hash,
            from: optional_address(result.get("from")),
            to: optional_address(result.get("to")),
            value,
        }))
    }

    async fn transaction_receipt(&self, hash: B256) -> RpcResult<Option<TxReceipt>> {
        let result = self
            .call("eth_getTransactionReceipt", json!([format!("{:#x}", hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let status = result
            .get("status")
            .ok_or_else(|| self.malformed("receipt has no status"))?;
        let success = self.quantity_u64(status, "status")? == 1;

        Ok(Some(TxReceipt {
            tx_hash: hash,
            success,
            block_number: result
                .get("blockNumber")
                .and_then(Value::as_str)
                .and_then(parse_quantity_u64),
            gas_used: result
                .get("gasUsed")
                .and_then(Value::as_str)
                .and_then(parse_quantity_u64),
        }))
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        let result = self
            .call(
                "eth_getBalance",
                json!([format!("{:#x}", address), "latest"]),
            )
            .await?;
        self.quantity_u256(&result, "balance")
    }

    async fn latest_base_fee(&self) -> RpcResult<u128> {
        let block = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        if let Some(base_fee) = block.get("baseFeePerGas").filter(|v| !v.is_null()) {
            let fee = self.quantity_u256(base_fee, "baseFeePerGas")?;
            return u128::try_from(fee).map_err(|_| self.malformed("base fee overflows u128"));
        }

        // Pre-London chains
        let price = self.call("eth_gasPrice", json!([])).await?;
        let fee = self.quantity_u256(&price, "gas price")?;
        u128::try_from(fee).map_err(|_| self.malformed("gas price overflows u128"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(url: &str) -> HttpChainRpc {
        let pool = Arc::new(EndpointPool::new(vec![url.to_string()], vec!["wss://unused"]).unwrap());
        HttpChainRpc::new(pool, Duration::from_secs(5)).unwrap()
    }

    fn address() -> Address {
        "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
    }

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_quantity_u64("0x0"), Some(0));
        assert_eq!(parse_quantity_u64("0x1a"), Some(26));
        assert_eq!(parse_quantity_u64("26"), None);
        assert_eq!(
            parse_quantity_u256("0xde0b6b3a7640000"),
            Some(U256::from(1_000_000_000_000_000_000u128))
        );
    }

    #[tokio::test]
    async fn test_transaction_count_uses_pending_tag() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionCount",
                "params": ["0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266", "pending"],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x9"}"#)
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        assert_eq!(rpc.transaction_count(address()).await.unwrap(), 9);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_nonce_rejection_is_classified() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low: next nonce 9, tx nonce 7"}}"#,
            )
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        let err = rpc.send_raw_transaction(&[0x02, 0x01]).await.unwrap_err();
        assert!(err.is_nonce_conflict());
    }

    #[tokio::test]
    async fn test_http_429_is_rate_limit() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(429)
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        let err = rpc.balance(address()).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_missing_receipt_and_transaction_are_none() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .expect(2)
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        assert_eq!(rpc.transaction_receipt(B256::ZERO).await.unwrap(), None);
        assert_eq!(rpc.transaction_by_hash(B256::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_receipt_status_decoding() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"status":"0x0","blockNumber":"0x10","gasUsed":"0x5208"}}"#,
            )
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        let receipt = rpc.transaction_receipt(B256::ZERO).await.unwrap().unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.gas_used, Some(21_000));
    }

    #[tokio::test]
    async fn test_transaction_descriptor_decoding() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"from":"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266","to":null,"value":"0x38d7ea4c68000"}}"#,
            )
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        let tx = rpc.transaction_by_hash(B256::ZERO).await.unwrap().unwrap();
        assert_eq!(tx.from, Some(address()));
        assert_eq!(tx.to, None);
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000u64));
    }

    #[tokio::test]
    async fn test_base_fee_falls_back_to_gas_price() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_getBlockByNumber"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x1"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_gasPrice"})))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":"0x3b9aca00"}"#)
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        assert_eq!(rpc.latest_base_fee().await.unwrap(), 1_000_000_000);
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let rpc = client_for(&server.url());
        let err = rpc.latest_base_fee().await.unwrap_err();
        assert!(matches!(err, RpcManagerError::MalformedResponse { .. }));
        assert!(err.is_retryable());
    }
}

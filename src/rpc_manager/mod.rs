//! RPC Manager Module
//!
//! Endpoint rotation, error classification and the chain boundary every
//! network round trip goes through.

use crate::types::{TxDescriptor, TxReceipt};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

// Submodules
pub mod endpoint_pool;
pub mod http_client;
pub mod rpc_errors;

// Re-exports for convenience
pub use endpoint_pool::{Endpoint, EndpointKind, EndpointPool};
pub use http_client::HttpChainRpc;
pub use rpc_errors::{RpcManagerError, RpcResult};

/// Request-response access to the chain.
///
/// Implementations always talk to the pool's current request-response
/// endpoint; rotation on rate limiting is the caller's decision.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Transaction count of `address` including pending transactions
    async fn transaction_count(&self, address: Address) -> RpcResult<u64>;

    /// Broadcast an EIP-2718 encoded signed transaction
    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<B256>;

    /// Look up a transaction; `None` if the endpoint does not know it
    async fn transaction_by_hash(&self, hash: B256) -> RpcResult<Option<TxDescriptor>>;

    /// Inclusion receipt; `None` while the transaction is not yet included
    async fn transaction_receipt(&self, hash: B256) -> RpcResult<Option<TxReceipt>>;

    async fn balance(&self, address: Address) -> RpcResult<U256>;

    /// Base fee of the latest block, in wei
    async fn latest_base_fee(&self) -> RpcResult<u128>;
}

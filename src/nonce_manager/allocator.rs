//! Account nonce allocator
//!
//! Hands out strictly increasing sequence numbers for one account to any
//! number of concurrent submitters. The allocator starts `Unknown`; the first
//! allocation (or an explicit `resync`) reads the pending transaction count
//! from the network.
//!
//! Read-increment and resync both happen under one async mutex, so when the
//! state is `Unknown` the first caller performs the network round trip and
//! every queued caller observes its result. The lock is never held across
//! signing, submission or confirmation.

use super::nonce_errors::{NonceError, NonceResult};
use crate::metrics::metrics;
use crate::rpc_manager::ChainRpc;
use alloy::primitives::Address;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Sentinel for the lock-free mirror of the state
const UNKNOWN: u64 = u64::MAX;

/// Allocator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "next", rename_all = "snake_case")]
pub enum NonceState {
    /// Next value to hand out
    Known(u64),
    /// Must be refreshed from the network before the next allocation
    Unknown,
}

impl NonceState {
    fn from_mirror(raw: u64) -> Self {
        if raw == UNKNOWN {
            NonceState::Unknown
        } else {
            NonceState::Known(raw)
        }
    }

    fn to_mirror(self) -> u64 {
        match self {
            NonceState::Known(next) => next,
            NonceState::Unknown => UNKNOWN,
        }
    }
}

pub struct AccountNonceAllocator {
    rpc: Arc<dyn ChainRpc>,
    address: Address,
    state: Mutex<NonceState>,
    /// Copy of `state` for `peek`, written under the lock
    observed: AtomicU64,
}

impl std::fmt::Debug for AccountNonceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountNonceAllocator")
            .field("address", &self.address)
            .field("state", &self.peek())
            .finish()
    }
}

impl AccountNonceAllocator {
    /// Create an allocator in the `Unknown` state
    pub fn new(rpc: Arc<dyn ChainRpc>, address: Address) -> Self {
        Self {
            rpc,
            address,
            state: Mutex::new(NonceState::Unknown),
            observed: AtomicU64::new(UNKNOWN),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Allocate the next sequence number, resyncing first if `Unknown`.
    ///
    /// On resync failure the state stays `Unknown` and the endpoint error is
    /// returned; nothing is consumed.
    pub async fn allocate(&self) -> NonceResult<u64> {
        let mut state = self.state.lock().await;

        let next = match *state {
            NonceState::Known(next) => next,
            NonceState::Unknown => self.fetch().await?,
        };

        self.store(&mut state, NonceState::Known(next + 1));
        metrics().nonce_allocations.inc();
        debug!(address = %self.address, nonce = next, "Allocated nonce");

        Ok(next)
    }

    /// Mark the local view as possibly drifted. Idempotent.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if let NonceState::Known(next) = *state {
            self.store(&mut state, NonceState::Unknown);
            metrics().nonce_invalidations.inc();
            warn!(address = %self.address, discarded_next = next, "Nonce invalidated");
        }
    }

    /// Refresh from the network now, regardless of the current state
    pub async fn resync(&self) -> NonceResult<u64> {
        let mut state = self.state.lock().await;
        let next = self.fetch().await?;
        self.store(&mut state, NonceState::Known(next));
        Ok(next)
    }

    /// Current state without waiting for in-progress allocations
    pub fn peek(&self) -> NonceState {
        NonceState::from_mirror(self.observed.load(Ordering::Acquire))
    }

    fn store(&self, state: &mut NonceState, new: NonceState) {
        *state = new;
        self.observed.store(new.to_mirror(), Ordering::Release);
    }

    /// One network round trip. Caller holds the state lock.
    async fn fetch(&self) -> NonceResult<u64> {
        metrics().nonce_resyncs.inc();
        match self.rpc.transaction_count(self.address).await {
            Ok(next) => {
                info!(address = %self.address, nonce = next, "Nonce resynced from network");
                Ok(next)
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "Nonce resync failed");
                Err(NonceError::Resync(e))
            }
        }
    }
}

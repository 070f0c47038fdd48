//! Admission filter and opportunity predicate for pending transactions
//!
//! Two cheap gates run before a strike: a sampling filter that bounds how
//! many hashes are looked up at all, and a predicate over the fetched
//! descriptor. The predicate is a trait so the heuristic can be swapped.

use crate::types::{wei_to_eth_f64, TxDescriptor};
use alloy::primitives::U256;

/// Decides whether an observed pending transaction warrants a strike
pub trait OpportunityPredicate: Send + Sync {
    fn is_opportunity(&self, tx: &TxDescriptor) -> bool;
}

/// Transaction has a destination and moves more than `min_value` wei
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinValuePredicate {
    pub min_value: U256,
}

impl MinValuePredicate {
    pub fn new(min_value: U256) -> Self {
        Self { min_value }
    }
}

impl OpportunityPredicate for MinValuePredicate {
    #[inline]
    fn is_opportunity(&self, tx: &TxDescriptor) -> bool {
        let hit = tx.to.is_some() && tx.value > self.min_value;
        if hit {
            tracing::trace!(
                hash = %tx.hash,
                value_eth = wei_to_eth_f64(tx.value),
                "Descriptor above threshold"
            );
        }
        hit
    }
}

impl<F> OpportunityPredicate for F
where
    F: Fn(&TxDescriptor) -> bool + Send + Sync,
{
    fn is_opportunity(&self, tx: &TxDescriptor) -> bool {
        self(tx)
    }
}

/// Admits a fixed fraction of inbound hashes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingFilter {
    rate: f64,
}

impl SamplingFilter {
    /// `rate` is clamped to [0, 1]
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline(always)]
    pub fn admit(&self) -> bool {
        if self.rate >= 1.0 {
            true
        } else if self.rate <= 0.0 {
            false
        } else {
            fastrand::f64() < self.rate
        }
    }
}

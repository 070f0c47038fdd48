//! Common types used throughout the engine

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Which path triggered a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Automatic submission in response to an observed pending transaction
    Strike,
    /// Caller-requested transfer out of the treasury account
    Withdrawal,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Strike => "strike",
            SubmissionKind::Withdrawal => "withdrawal",
        }
    }
}

/// Fee-policy override carried by an intent.
///
/// Unset fields fall back to the pipeline defaults for the submission kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Priority fee (tip) per gas unit, in wei
    pub priority_fee_wei: Option<u128>,
    /// Gas (computation) limit
    pub gas_limit: Option<u64>,
}

impl FeePolicy {
    /// Policy that defers entirely to the pipeline defaults
    pub const DEFAULT: FeePolicy = FeePolicy {
        priority_fee_wei: None,
        gas_limit: None,
    };

    pub const fn with_priority_fee(priority_fee_wei: u128) -> Self {
        Self {
            priority_fee_wei: Some(priority_fee_wei),
            gas_limit: None,
        }
    }

    pub const fn with_gas_limit(gas_limit: u64) -> Self {
        Self {
            priority_fee_wei: None,
            gas_limit: Some(gas_limit),
        }
    }
}

/// A value transfer the pipeline should turn into a signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    /// Destination address
    pub to: Address,
    /// Amount in wei
    pub value: U256,
    /// Optional fee override
    pub fees: FeePolicy,
    /// Path that produced the intent
    pub kind: SubmissionKind,
}

impl TransferIntent {
    pub fn withdrawal(to: Address, value: U256, fees: FeePolicy) -> Self {
        Self {
            to,
            value,
            fees,
            kind: SubmissionKind::Withdrawal,
        }
    }

    pub fn strike(to: Address, value: U256, fees: FeePolicy) -> Self {
        Self {
            to,
            value,
            fees,
            kind: SubmissionKind::Strike,
        }
    }
}

/// Pending transaction as observed on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDescriptor {
    pub hash: B256,
    pub from: Option<Address>,
    /// `None` for contract creations
    pub to: Option<Address>,
    pub value: U256,
}

/// Inclusion receipt for a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    /// Execution status reported by the network
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Convert a wei amount to a floating point ether figure for accounting and display.
///
/// Loses precision beyond ~15 significant digits, which is acceptable for the
/// best-effort dollar totals this is used for.
pub fn wei_to_eth_f64(value: U256) -> f64 {
    let wei_per_eth = 1e18_f64;
    match u128::try_from(value) {
        Ok(small) => small as f64 / wei_per_eth,
        Err(_) => alloy::primitives::utils::format_ether(value)
            .parse::<f64>()
            .unwrap_or(f64::MAX),
    }
}

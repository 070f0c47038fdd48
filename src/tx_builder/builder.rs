//! Core transaction building logic

use super::errors::TransactionBuilderError;
use crate::types::{SubmissionKind, TransferIntent};
use crate::wallet::{SignedTransfer, SigningIdentity};
use alloy::consensus::TxEip1559;
use alloy::primitives::{Bytes, TxKind};
use serde::{Deserialize, Serialize};

/// 0.05 gwei
pub const DEFAULT_PRIORITY_FEE_WEI: u128 = 50_000_000;
pub const DEFAULT_STRIKE_GAS_LIMIT: u64 = 150_000;
/// Plain value transfer
pub const DEFAULT_TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Fee parameters used when an intent does not override them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDefaults {
    pub priority_fee_wei: u128,
    pub strike_gas_limit: u64,
    pub transfer_gas_limit: u64,
    pub base_fee_multiplier: u128,
}

impl Default for FeeDefaults {
    fn default() -> Self {
        Self {
            priority_fee_wei: DEFAULT_PRIORITY_FEE_WEI,
            strike_gas_limit: DEFAULT_STRIKE_GAS_LIMIT,
            transfer_gas_limit: DEFAULT_TRANSFER_GAS_LIMIT,
            base_fee_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxBuilder {
    identity: SigningIdentity,
    defaults: FeeDefaults,
}

impl TxBuilder {
    pub fn new(identity: SigningIdentity, defaults: FeeDefaults) -> Self {
        Self { identity, defaults }
    }

    /// Resolved (priority fee, gas limit) for an intent
    pub fn resolve_fees(&self, intent: &TransferIntent) -> (u128, u64) {
        let default_gas = match intent.kind {
            SubmissionKind::Strike => self.defaults.strike_gas_limit,
            SubmissionKind::Withdrawal => self.defaults.transfer_gas_limit,
        };
        (
            intent
                .fees
                .priority_fee_wei
                .unwrap_or(self.defaults.priority_fee_wei),
            intent.fees.gas_limit.unwrap_or(default_gas),
        )
    }

    /// Build the unsigned transaction
    pub fn build(
        &self,
        intent: &TransferIntent,
        nonce: u64,
        base_fee: u128,
    ) -> Result<TxEip1559, TransactionBuilderError> {
        let (priority_fee, gas_limit) = self.resolve_fees(intent);
        if gas_limit < DEFAULT_TRANSFER_GAS_LIMIT {
            return Err(TransactionBuilderError::InvalidGasLimit(gas_limit));
        }

        let max_fee = base_fee
            .checked_mul(self.defaults.base_fee_multiplier)
            .and_then(|fee| fee.checked_add(priority_fee))
            .ok_or(TransactionBuilderError::FeeOverflow {
                base_fee,
                priority_fee,
            })?;

        Ok(TxEip1559 {
            chain_id: self.identity.chain_id(),
            nonce,
            gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee,
            to: TxKind::Call(intent.to),
            value: intent.value,
            access_list: Default::default(),
            input: Bytes::new(),
        })
    }

    /// Build and sign in one step
    pub fn build_signed(
        &self,
        intent: &TransferIntent,
        nonce: u64,
        base_fee: u128,
    ) -> Result<SignedTransfer, TransactionBuilderError> {
        let tx = self.build(intent, nonce, base_fee)?;
        Ok(self.identity.sign(tx)?)
    }
}

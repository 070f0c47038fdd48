//! Submission pipeline and withdrawal presets

use crate::nonce_manager::NonceError;
use crate::rpc_manager::RpcManagerError;
use crate::structured_logging::PipelineContext;
use crate::tx_builder::TransactionBuilderError;
use crate::types::TransferIntent;
use alloy::primitives::B256;
use async_trait::async_trait;
use thiserror::Error;

pub mod pipeline;
pub mod presets;

pub use pipeline::{PipelineConfig, SubmissionPipeline};
pub use presets::{BalanceCheck, DestinationRule, WithdrawalError, WithdrawalPreset, PRESETS};

/// Why a submission never produced a confirmed receipt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubmissionFailure {
    /// No sequence number could be obtained
    #[error("nonce unavailable: {0}")]
    NonceUnavailable(#[source] NonceError),

    /// Fee-market snapshot could not be read
    #[error("fee market unavailable: {0}")]
    FeeMarket(#[source] RpcManagerError),

    #[error("build failed: {0}")]
    Build(#[source] TransactionBuilderError),

    /// The endpoint refused the signed transaction
    #[error("rejected: {0}")]
    Rejected(#[source] RpcManagerError),

    /// Accepted but no receipt within the confirmation window
    #[error("no receipt after {waited_ms}ms")]
    ConfirmationTimeout { waited_ms: u64 },
}

impl SubmissionFailure {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionFailure::NonceUnavailable(_) => "nonce_unavailable",
            SubmissionFailure::FeeMarket(_) => "fee_market",
            SubmissionFailure::Build(_) => "build",
            SubmissionFailure::Rejected(e) if e.is_nonce_conflict() => "nonce_conflict",
            SubmissionFailure::Rejected(RpcManagerError::InsufficientFunds { .. }) => {
                "insufficient_funds"
            }
            SubmissionFailure::Rejected(_) => "rejected",
            SubmissionFailure::ConfirmationTimeout { .. } => "confirmation_timeout",
        }
    }
}

/// Terminal result of one submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Included and executed successfully
    ConfirmedSuccess { tx_hash: B256 },
    /// Included but reverted
    ConfirmedFailure { tx_hash: B256 },
    /// Never entered the network, or the confirmation wait elapsed
    SubmissionError {
        tx_hash: Option<B256>,
        reason: SubmissionFailure,
    },
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::ConfirmedSuccess { .. })
    }

    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            SubmissionOutcome::ConfirmedSuccess { tx_hash }
            | SubmissionOutcome::ConfirmedFailure { tx_hash } => Some(*tx_hash),
            SubmissionOutcome::SubmissionError { tx_hash, .. } => *tx_hash,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::ConfirmedSuccess { .. } => "confirmed_success",
            SubmissionOutcome::ConfirmedFailure { .. } => "confirmed_failure",
            SubmissionOutcome::SubmissionError { .. } => "submission_error",
        }
    }

    /// Human readable error, `None` on success
    pub fn error_message(&self) -> Option<String> {
        match self {
            SubmissionOutcome::ConfirmedSuccess { .. } => None,
            SubmissionOutcome::ConfirmedFailure { .. } => {
                Some("transaction reverted".to_string())
            }
            SubmissionOutcome::SubmissionError { reason, .. } => Some(reason.to_string()),
        }
    }
}

/// Ledger effect of a confirmed success
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CreditRule {
    /// Fixed per-trade credit to realized gains
    Strike { usd: f64 },
    /// Transferred amount at a reference price to withdrawn value
    Withdrawn { reference_price_usd: f64 },
    None,
}

/// Anything that can drive an intent to a terminal outcome
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        ctx: &PipelineContext,
        intent: TransferIntent,
        credit: CreditRule,
    ) -> SubmissionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_labels() {
        let conflict = SubmissionFailure::Rejected(RpcManagerError::classify(
            "rpc",
            None,
            "nonce too low",
        ));
        assert_eq!(conflict.label(), "nonce_conflict");

        let funds = SubmissionFailure::Rejected(RpcManagerError::InsufficientFunds {
            endpoint: "rpc".to_string(),
        });
        assert_eq!(funds.label(), "insufficient_funds");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = SubmissionOutcome::ConfirmedSuccess { tx_hash: B256::ZERO };
        assert!(ok.is_success());
        assert_eq!(ok.error_message(), None);

        let timeout = SubmissionOutcome::SubmissionError {
            tx_hash: Some(B256::ZERO),
            reason: SubmissionFailure::ConfirmationTimeout { waited_ms: 500 },
        };
        assert!(!timeout.is_success());
        assert_eq!(timeout.tx_hash(), Some(B256::ZERO));
        assert_eq!(timeout.error_message().as_deref(), Some("no receipt after 500ms"));
    }
}

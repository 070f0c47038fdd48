//! Orchestrator facade
//!
//! What the HTTP layer calls: run a named withdrawal preset through the
//! submission pipeline, and report treasury status.

use crate::ledger::AccountingLedger;
use crate::nonce_manager::{AccountNonceAllocator, NonceState};
use crate::rpc_manager::{ChainRpc, EndpointPool, RpcManagerError};
use crate::structured_logging::PipelineContext;
use crate::submission::presets::{self, parse_amount_eth};
use crate::submission::{BalanceCheck, CreditRule, SubmissionOutcome, Submitter, WithdrawalError};
use crate::types::{wei_to_eth_f64, TransferIntent};
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Parse a hex address supplied by a caller
pub fn parse_destination(raw: &str) -> Result<Address, WithdrawalError> {
    Address::from_str(raw.trim())
        .map_err(|e| WithdrawalError::InvalidDestination(format!("{}: {}", raw, e)))
}

/// Caller input for one withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    /// Decimal ether amount, e.g. `"0.05"`
    pub amount_eth: String,
    pub destination: Option<Address>,
    /// Second destination of split presets
    pub aux_destination: Option<Address>,
}

/// Terminal state of one leg
#[derive(Debug, Clone, Serialize)]
pub struct LegReport {
    pub to: String,
    pub amount_eth: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReport {
    /// True only when every leg confirmed successfully
    pub success: bool,
    pub strategy: String,
    /// Hash of the first leg, when it was broadcast
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    pub txs: Vec<LegReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Treasury balance after all legs, for presets that read it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after_eth: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountingReport {
    pub earnings_usd: String,
    pub withdrawn_usd: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub network: String,
    pub wallet: String,
    pub balance_eth: String,
    pub balance_usd: String,
    pub nonce: NonceState,
    pub accounting: AccountingReport,
}

/// Static settings for the facade
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub network_name: String,
    /// Fallback destination when a request names none
    pub payout: Option<Address>,
    pub reference_price_usd: f64,
}

pub struct Orchestrator {
    submitter: Arc<dyn Submitter>,
    rpc: Arc<dyn ChainRpc>,
    pool: Arc<EndpointPool>,
    nonces: Arc<AccountNonceAllocator>,
    ledger: Arc<AccountingLedger>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        submitter: Arc<dyn Submitter>,
        rpc: Arc<dyn ChainRpc>,
        pool: Arc<EndpointPool>,
        nonces: Arc<AccountNonceAllocator>,
        ledger: Arc<AccountingLedger>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            submitter,
            rpc,
            pool,
            nonces,
            ledger,
            settings,
        }
    }

    pub fn treasury(&self) -> Address {
        self.nonces.address()
    }

    async fn treasury_balance(&self) -> Result<U256, RpcManagerError> {
        self.rpc.balance(self.treasury()).await.inspect_err(|e| {
            self.pool.rotate_on_error(e);
        })
    }

    /// Run preset `preset_id` to completion.
    ///
    /// Request and planning errors are returned as `Err` before anything is
    /// broadcast. Once legs start, every leg reaches a terminal outcome and
    /// the report carries all of them; a failed leg does not stop the ones
    /// after it.
    pub async fn submit_withdrawal(
        &self,
        preset_id: &str,
        request: WithdrawalRequest,
    ) -> Result<WithdrawalReport, WithdrawalError> {
        let preset = presets::find(preset_id)
            .ok_or_else(|| WithdrawalError::UnknownPreset(preset_id.to_string()))?;
        let amount = parse_amount_eth(&request.amount_eth)?;
        let legs = preset.plan(
            amount,
            request.destination,
            request.aux_destination,
            self.settings.payout,
        )?;

        if preset.balance_check == BalanceCheck::Before {
            let needed = legs.iter().fold(U256::ZERO, |acc, leg| acc.saturating_add(leg.value));
            let available = self
                .treasury_balance()
                .await
                .map_err(WithdrawalError::Balance)?;
            if available < needed {
                return Err(WithdrawalError::InsufficientBalance { needed, available });
            }
        }

        let ctx = PipelineContext::new(&format!("withdraw/{}", preset.id));
        info!(
            request_id = %ctx.request_id,
            strategy = preset.id,
            legs = legs.len(),
            amount_eth = %format_ether(amount),
            "Withdrawal started"
        );

        let mut reports = Vec::with_capacity(legs.len());
        for (i, leg) in legs.iter().enumerate() {
            let leg_ctx = ctx.child(&format!("leg-{}", i));
            let outcome = self
                .submitter
                .submit(
                    &leg_ctx,
                    TransferIntent::withdrawal(leg.to, leg.value, preset.fees),
                    CreditRule::Withdrawn {
                        reference_price_usd: self.settings.reference_price_usd,
                    },
                )
                .await;
            reports.push(leg_report(leg.to, leg.value, &outcome));
        }

        let balance_after_eth = if preset.balance_check == BalanceCheck::After {
            match self.treasury_balance().await {
                Ok(balance) => Some(format_ether(balance)),
                Err(e) => {
                    warn!(error = %e, "Post-withdrawal balance read failed");
                    None
                }
            }
        } else {
            None
        };

        let failed: Vec<&LegReport> = reports.iter().filter(|r| r.error.is_some()).collect();
        let error = match failed.as_slice() {
            [] => None,
            [only] if reports.len() == 1 => only.error.clone(),
            [first, ..] => Some(format!(
                "{} of {} legs failed: {}",
                failed.len(),
                reports.len(),
                first.error.as_deref().unwrap_or_default()
            )),
        };

        let report = WithdrawalReport {
            success: error.is_none(),
            strategy: preset.id.to_string(),
            tx: reports.first().and_then(|r| r.tx.clone()),
            txs: reports,
            error,
            balance_after_eth,
        };
        info!(
            request_id = %ctx.request_id,
            strategy = preset.id,
            success = report.success,
            "Withdrawal finished"
        );
        Ok(report)
    }

    /// Balance, nonce and accounting totals for the treasury
    pub async fn get_status(&self) -> Result<StatusReport, RpcManagerError> {
        let balance = self.treasury_balance().await?;
        let balance_eth = wei_to_eth_f64(balance);
        let totals = self.ledger.snapshot();

        Ok(StatusReport {
            network: self.settings.network_name.clone(),
            wallet: self.treasury().to_checksum(None),
            balance_eth: format_ether(balance),
            balance_usd: format!("{:.2}", balance_eth * self.settings.reference_price_usd),
            nonce: self.nonces.peek(),
            accounting: AccountingReport {
                earnings_usd: format!("{:.2}", totals.earnings_usd),
                withdrawn_usd: format!("{:.2}", totals.withdrawn_usd),
            },
        })
    }
}

fn leg_report(to: Address, value: U256, outcome: &SubmissionOutcome) -> LegReport {
    LegReport {
        to: to.to_checksum(None),
        amount_eth: format_ether(value),
        status: outcome.label(),
        tx: outcome.tx_hash().map(|h| format!("{:#x}", h)),
        error: outcome.error_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_pipeline, ReceiptPlan, TestRig};

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn orchestrator(payout: Option<Address>) -> (Orchestrator, TestRig) {
        let rig = test_pipeline();
        let orch = Orchestrator::new(
            rig.pipeline.clone(),
            rig.rpc.clone(),
            rig.pool.clone(),
            rig.nonces.clone(),
            rig.ledger.clone(),
            OrchestratorSettings {
                network_name: "BASE-MAINNET".to_string(),
                payout,
                reference_price_usd: 3913.0,
            },
        );
        (orch, rig)
    }

    fn request(amount: &str, destination: Option<Address>, aux: Option<Address>) -> WithdrawalRequest {
        WithdrawalRequest {
            amount_eth: amount.to_string(),
            destination,
            aux_destination: aux,
        }
    }

    #[tokio::test]
    async fn test_standard_withdrawal_credits_ledger() {
        let (orch, rig) = orchestrator(Some(addr(9)));

        let report = orch
            .submit_withdrawal("standard-eoa", request("1", None, None))
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.strategy, "standard-eoa");
        assert!(report.tx.is_some());
        assert_eq!(rig.rpc.sent()[0].to, Some(addr(9)));
        assert!((rig.ledger.snapshot().withdrawn_usd - 3913.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_split_partial_failure_credits_only_successful_legs() {
        let (orch, rig) = orchestrator(Some(addr(3)));
        rig.rpc.script_receipt(ReceiptPlan::Success);
        rig.rpc.script_receipt(ReceiptPlan::Revert);
        rig.rpc.script_receipt(ReceiptPlan::Success);

        let report = orch
            .submit_withdrawal("micro-split-3", request("0.3", Some(addr(1)), Some(addr(2))))
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.txs.len(), 3);
        assert_eq!(report.txs[1].status, "confirmed_failure");
        assert!(report.error.as_deref().unwrap().starts_with("1 of 3 legs failed"));

        let sent = rig.rpc.sent();
        assert_eq!(sent.len(), 3);
        let tos: Vec<_> = sent.iter().map(|t| t.to).collect();
        assert_eq!(tos, vec![Some(addr(1)), Some(addr(2)), Some(addr(3))]);

        // Two successful legs of 0.1 ETH each
        let withdrawn = rig.ledger.snapshot().withdrawn_usd;
        assert!((withdrawn - 0.2 * 3913.0).abs() < 1e-6, "withdrawn {}", withdrawn);
    }

    #[tokio::test]
    async fn test_check_before_refuses_when_underfunded() {
        let (orch, rig) = orchestrator(Some(addr(9)));
        rig.rpc.set_balance(U256::from(1_000u64));

        let err = orch
            .submit_withdrawal("check-before", request("1", None, None))
            .await
            .unwrap_err();

        assert!(matches!(err, WithdrawalError::InsufficientBalance { .. }));
        assert!(rig.rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_check_after_reports_balance() {
        let (orch, _rig) = orchestrator(Some(addr(9)));
        let report = orch
            .submit_withdrawal("check-after", request("1", None, None))
            .await
            .unwrap();
        // Mock starts at 10 ETH and deducts transfer value
        assert_eq!(report.balance_after_eth.as_deref(), Some("9.000000000000000000"));
    }

    #[tokio::test]
    async fn test_request_errors_broadcast_nothing() {
        let (orch, rig) = orchestrator(None);

        assert!(matches!(
            orch.submit_withdrawal("bogus", request("1", None, None)).await,
            Err(WithdrawalError::UnknownPreset(_))
        ));
        assert!(matches!(
            orch.submit_withdrawal("standard-eoa", request("nan", Some(addr(1)), None)).await,
            Err(WithdrawalError::InvalidAmount(_))
        ));
        assert!(matches!(
            orch.submit_withdrawal("standard-eoa", request("1", None, None)).await,
            Err(WithdrawalError::NoPayoutDestination)
        ));
        assert!(rig.rpc.sent().is_empty());
    }

    #[tokio::test]
    async fn test_status_formats_like_the_http_surface() {
        let (orch, rig) = orchestrator(None);
        rig.rpc.set_balance(U256::from(500_000_000_000_000_000u128));
        rig.ledger.credit_strike(1.5);

        let status = orch.get_status().await.unwrap();
        assert_eq!(status.network, "BASE-MAINNET");
        assert_eq!(status.wallet, "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert_eq!(status.balance_usd, "1956.50");
        assert_eq!(status.accounting.earnings_usd, "1.50");
        assert_eq!(status.accounting.withdrawn_usd, "0.00");
        assert_eq!(status.nonce, NonceState::Unknown);
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            parse_destination(" 0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266 ").unwrap(),
            crate::test_utils::test_address()
        );
        assert!(matches!(
            parse_destination("0x1234"),
            Err(WithdrawalError::InvalidDestination(_))
        ));
    }
}

//! Intent to outcome: fee snapshot, nonce, sign, broadcast, confirm.
//!
//! The only shared lock touched here is the nonce allocator's, and only for
//! the duration of `allocate`/`invalidate`. Broadcast and receipt polling run
//! unlocked so any number of submissions can be in flight at once.

use super::{CreditRule, SubmissionFailure, SubmissionOutcome, Submitter};
use crate::ledger::AccountingLedger;
use crate::metrics::metrics;
use crate::nonce_manager::AccountNonceAllocator;
use crate::rpc_manager::{ChainRpc, EndpointKind, EndpointPool, RpcManagerError};
use crate::structured_logging::PipelineContext;
use crate::tx_builder::TxBuilder;
use crate::types::{wei_to_eth_f64, TransferIntent, TxReceipt};
use alloy::primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on the wait for an inclusion receipt
    #[serde(with = "duration_ms")]
    pub confirmation_timeout: Duration,
    /// Delay between receipt queries
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

pub struct SubmissionPipeline {
    rpc: Arc<dyn ChainRpc>,
    pool: Arc<EndpointPool>,
    nonces: Arc<AccountNonceAllocator>,
    builder: TxBuilder,
    ledger: Arc<AccountingLedger>,
    config: PipelineConfig,
}

impl SubmissionPipeline {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        pool: Arc<EndpointPool>,
        nonces: Arc<AccountNonceAllocator>,
        builder: TxBuilder,
        ledger: Arc<AccountingLedger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            rpc,
            pool,
            nonces,
            builder,
            ledger,
            config,
        }
    }

    pub fn nonces(&self) -> &Arc<AccountNonceAllocator> {
        &self.nonces
    }

    fn note_rpc_error(&self, err: &RpcManagerError) {
        self.pool.rotate_on_error(err);
    }

    fn finish(
        &self,
        ctx: &PipelineContext,
        intent: &TransferIntent,
        started: Instant,
        outcome: SubmissionOutcome,
    ) -> SubmissionOutcome {
        let m = metrics();
        m.submission_outcomes
            .with_label_values(&[intent.kind.as_str(), outcome.label()])
            .inc();

        let latency_ms = started.elapsed().as_millis() as u64;
        if let SubmissionOutcome::SubmissionError { tx_hash, reason } = &outcome {
            m.submission_errors.with_label_values(&[reason.label()]).inc();
            ctx.logger
                .log_submission_failure(tx_hash.as_ref(), &reason.to_string(), latency_ms);
        }
        outcome
    }

    /// Poll for a receipt until found or the confirmation window closes
    async fn await_receipt(&self, hash: B256) -> Option<TxReceipt> {
        let deadline = Instant::now() + self.config.confirmation_timeout;
        loop {
            match self.rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => {
                    self.note_rpc_error(&e);
                    debug!(tx_hash = %hash, error = %e, "Receipt query failed, retrying");
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn apply_credit(&self, intent: &TransferIntent, credit: CreditRule) {
        match credit {
            CreditRule::Strike { usd } => self.ledger.credit_strike(usd),
            CreditRule::Withdrawn {
                reference_price_usd,
            } => self
                .ledger
                .credit_withdrawal(wei_to_eth_f64(intent.value), reference_price_usd),
            CreditRule::None => {}
        }
    }
}

#[async_trait]
impl Submitter for SubmissionPipeline {
    async fn submit(
        &self,
        ctx: &PipelineContext,
        intent: TransferIntent,
        credit: CreditRule,
    ) -> SubmissionOutcome {
        let started = Instant::now();
        let m = metrics();
        m.submissions_total
            .with_label_values(&[intent.kind.as_str()])
            .inc();

        // Read before allocating so a fee-market failure consumes no nonce
        let base_fee = match self.rpc.latest_base_fee().await {
            Ok(fee) => fee,
            Err(e) => {
                self.note_rpc_error(&e);
                return self.finish(
                    ctx,
                    &intent,
                    started,
                    SubmissionOutcome::SubmissionError {
                        tx_hash: None,
                        reason: SubmissionFailure::FeeMarket(e),
                    },
                );
            }
        };

        let nonce = match self.nonces.allocate().await {
            Ok(nonce) => nonce,
            Err(e) => {
                self.note_rpc_error(e.rpc_error());
                ctx.logger.log_nonce_operation("allocate", None, false);
                return self.finish(
                    ctx,
                    &intent,
                    started,
                    SubmissionOutcome::SubmissionError {
                        tx_hash: None,
                        reason: SubmissionFailure::NonceUnavailable(e),
                    },
                );
            }
        };
        ctx.logger.log_nonce_operation("allocate", Some(nonce), true);

        m.submissions_inflight.inc();
        scopeguard::defer! {
            metrics().submissions_inflight.dec();
        }

        ctx.logger.log_submission_attempt(
            intent.kind.as_str(),
            &intent.to,
            wei_to_eth_f64(intent.value),
            nonce,
        );

        let signed = match self.builder.build_signed(&intent, nonce, base_fee) {
            Ok(signed) => signed,
            Err(e) => {
                // The allocated value will never be broadcast
                self.nonces.invalidate().await;
                return self.finish(
                    ctx,
                    &intent,
                    started,
                    SubmissionOutcome::SubmissionError {
                        tx_hash: None,
                        reason: SubmissionFailure::Build(e),
                    },
                );
            }
        };

        let endpoint = self.pool.current(EndpointKind::RequestResponse).url.clone();
        let tx_hash = match self.rpc.send_raw_transaction(&signed.raw).await {
            Ok(hash) => hash,
            Err(e) => {
                self.note_rpc_error(&e);
                self.nonces.invalidate().await;
                return self.finish(
                    ctx,
                    &intent,
                    started,
                    SubmissionOutcome::SubmissionError {
                        tx_hash: None,
                        reason: SubmissionFailure::Rejected(e),
                    },
                );
            }
        };
        if tx_hash != signed.hash {
            ctx.logger.warn(&format!(
                "endpoint returned hash {} for locally computed {}",
                tx_hash, signed.hash
            ));
        }
        ctx.logger.log_submission_accepted(&tx_hash, &endpoint);

        let accepted = Instant::now();
        let outcome = match self.await_receipt(tx_hash).await {
            Some(receipt) => {
                m.confirmation_latency
                    .observe(accepted.elapsed().as_secs_f64());
                ctx.logger.log_confirmation(
                    &tx_hash,
                    receipt.success,
                    receipt.block_number,
                    started.elapsed().as_millis() as u64,
                );
                if receipt.success {
                    self.apply_credit(&intent, credit);
                    SubmissionOutcome::ConfirmedSuccess { tx_hash }
                } else {
                    SubmissionOutcome::ConfirmedFailure { tx_hash }
                }
            }
            None => {
                // Dropped or stuck; the network's view of the sequence is unclear
                self.nonces.invalidate().await;
                SubmissionOutcome::SubmissionError {
                    tx_hash: Some(tx_hash),
                    reason: SubmissionFailure::ConfirmationTimeout {
                        waited_ms: self.config.confirmation_timeout.as_millis() as u64,
                    },
                }
            }
        };

        self.finish(ctx, &intent, started, outcome)
    }
}

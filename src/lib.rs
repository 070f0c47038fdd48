//! Strike Engine - transaction orchestration for a single treasury account
//!
//! Keeps one account's outbound transaction sequence correct while automated
//! strikes and manual withdrawals submit concurrently through rotating RPC
//! endpoints, and a supervised pending-transaction subscription feeds the
//! strike path.

pub mod config;
pub mod endpoints;
pub mod ledger;
pub mod metrics;
pub mod nonce_manager;
pub mod orchestrator;
pub mod rpc_manager;
pub mod sniffer;
pub mod streaming;
pub mod structured_logging;
pub mod submission;
pub mod tx_builder;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use ledger::{AccountingLedger, LedgerTotals};
pub use nonce_manager::{AccountNonceAllocator, NonceState};
pub use orchestrator::{Orchestrator, OrchestratorSettings, StatusReport, WithdrawalReport, WithdrawalRequest};
pub use rpc_manager::{ChainRpc, Endpoint, EndpointKind, EndpointPool, HttpChainRpc};
pub use submission::{SubmissionOutcome, SubmissionPipeline, Submitter};
pub use types::{FeePolicy, TransferIntent};
pub use wallet::SigningIdentity;

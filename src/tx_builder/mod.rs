//! Transaction Builder
//!
//! Turns a transfer intent, an allocated nonce and a fee-market snapshot into
//! a signed EIP-1559 transaction.
//!
//! ## Fee policy
//!
//! - priority fee: intent override, else the default (0.05 gwei)
//! - gas limit: intent override, else 150 000 for strikes and 21 000 for
//!   withdrawals
//! - max fee per gas: `base_fee_multiplier * base_fee + priority_fee`

pub mod builder;
pub mod errors;

pub use builder::{FeeDefaults, TxBuilder};
pub use errors::TransactionBuilderError;

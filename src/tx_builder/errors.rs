//! Error types for transaction building

use thiserror::Error;

/// Failures between nonce allocation and broadcast.
///
/// Any of these after a nonce was allocated means the value was consumed
/// without a transaction; the pipeline invalidates the allocator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionBuilderError {
    /// max fee = multiplier x base fee + priority fee did not fit in u128
    #[error("Fee overflow: base fee {base_fee} wei, priority fee {priority_fee} wei")]
    FeeOverflow { base_fee: u128, priority_fee: u128 },

    #[error("Invalid gas limit: {0}")]
    InvalidGasLimit(u64),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),
}

impl From<crate::wallet::SigningError> for TransactionBuilderError {
    fn from(err: crate::wallet::SigningError) -> Self {
        TransactionBuilderError::Signing(err.0)
    }
}

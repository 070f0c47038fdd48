//! Signing identity for the treasury account

use crate::config::ConfigError;
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Signing error: {0}")]
pub struct SigningError(pub String);

/// A signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    /// EIP-2718 encoded envelope
    pub raw: Vec<u8>,
    pub hash: B256,
    pub nonce: u64,
}

/// Secret key plus the chain it signs for. Derived once at startup.
#[derive(Clone)]
pub struct SigningIdentity {
    signer: Arc<PrivateKeySigner>,
    chain_id: u64,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address())
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    /// Parse a hex secret key (with or without `0x`).
    ///
    /// Missing or malformed keys are configuration errors; the caller treats
    /// them as fatal.
    pub fn from_secret(secret: &str, chain_id: u64) -> Result<Self, ConfigError> {
        let secret = Zeroizing::new(secret.trim().to_string());
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let signer = PrivateKeySigner::from_str(&secret)
            .map_err(|e| ConfigError::InvalidSecret(e.to_string()))?;

        Ok(Self {
            signer: Arc::new(signer),
            chain_id,
        })
    }

    /// Public address of the account
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Sign and encode a transaction
    pub fn sign(&self, mut tx: TxEip1559) -> Result<SignedTransfer, SigningError> {
        if tx.chain_id != self.chain_id {
            return Err(SigningError(format!(
                "transaction chain id {} does not match identity chain id {}",
                tx.chain_id, self.chain_id
            )));
        }

        let nonce = tx.nonce;
        let sig = TxSignerSync::sign_transaction_sync(self.signer.as_ref(), &mut tx)
            .map_err(|e| SigningError(e.to_string()))?;
        let signed: TxEnvelope = tx.into_signed(sig).into();

        Ok(SignedTransfer {
            raw: signed.encoded_2718(),
            hash: *signed.tx_hash(),
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_address, TEST_SECRET};
    use alloy::primitives::{keccak256, TxKind, U256};

    fn transfer(chain_id: u64, nonce: u64) -> TxEip1559 {
        TxEip1559 {
            chain_id,
            nonce,
            gas_limit: 21_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 50_000_000,
            to: TxKind::Call(test_address()),
            value: U256::from(1u64),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_derives_address() {
        let identity = SigningIdentity::from_secret(TEST_SECRET, 8453).unwrap();
        assert_eq!(identity.address(), test_address());

        let unprefixed = SigningIdentity::from_secret(&TEST_SECRET[2..], 8453).unwrap();
        assert_eq!(unprefixed.address(), test_address());
    }

    #[test]
    fn test_missing_or_malformed_secret_rejected() {
        assert!(matches!(
            SigningIdentity::from_secret("   ", 8453),
            Err(ConfigError::MissingSecret)
        ));
        assert!(matches!(
            SigningIdentity::from_secret("0xnot-a-key", 8453),
            Err(ConfigError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_signed_hash_matches_encoding() {
        let identity = SigningIdentity::from_secret(TEST_SECRET, 8453).unwrap();
        let signed = identity.sign(transfer(8453, 7)).unwrap();

        assert_eq!(signed.nonce, 7);
        assert_eq!(signed.raw[0], 0x02);
        assert_eq!(signed.hash, keccak256(&signed.raw));
    }

    #[test]
    fn test_chain_mismatch_rejected() {
        let identity = SigningIdentity::from_secret(TEST_SECRET, 8453).unwrap();
        assert!(identity.sign(transfer(1, 0)).is_err());
    }
}

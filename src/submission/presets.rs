//! Named withdrawal strategies.
//!
//! Every preset is one row of `PRESETS`: how to resolve destinations, what
//! fee override to apply and whether to read the treasury balance around the
//! transfer. All of them drive the same pipeline.

use crate::rpc_manager::RpcManagerError;
use crate::types::FeePolicy;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use thiserror::Error;

/// 2 gwei
const ELEVATED_PRIORITY_FEE_WEI: u128 = 2_000_000_000;
const CONTRACT_CALL_GAS_LIMIT: u64 = 100_000;

/// How the legs of a withdrawal find their destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRule {
    /// One transfer to the explicit destination, else the default payout
    ExplicitOrPayout,
    /// `legs` equal transfers to destination, aux destination and payout
    Split { legs: u8 },
}

/// Balance read performed around the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceCheck {
    None,
    /// Refuse to submit unless the balance covers the amount
    Before,
    /// Report the balance once all legs are terminal
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalPreset {
    pub id: &'static str,
    pub destination: DestinationRule,
    pub fees: FeePolicy,
    pub balance_check: BalanceCheck,
}

const fn preset(id: &'static str) -> WithdrawalPreset {
    WithdrawalPreset {
        id,
        destination: DestinationRule::ExplicitOrPayout,
        fees: FeePolicy::DEFAULT,
        balance_check: BalanceCheck::None,
    }
}

pub const PRESETS: [WithdrawalPreset; 12] = [
    preset("standard-eoa"),
    WithdrawalPreset {
        balance_check: BalanceCheck::Before,
        ..preset("check-before")
    },
    WithdrawalPreset {
        balance_check: BalanceCheck::After,
        ..preset("check-after")
    },
    preset("two-factor-auth"),
    WithdrawalPreset {
        fees: FeePolicy::with_gas_limit(CONTRACT_CALL_GAS_LIMIT),
        ..preset("contract-call")
    },
    preset("timed-release"),
    WithdrawalPreset {
        destination: DestinationRule::Split { legs: 3 },
        ..preset("micro-split-3")
    },
    preset("consolidate-multi"),
    WithdrawalPreset {
        fees: FeePolicy::with_priority_fee(ELEVATED_PRIORITY_FEE_WEI),
        ..preset("max-priority")
    },
    WithdrawalPreset {
        fees: FeePolicy::with_priority_fee(0),
        ..preset("low-base-only")
    },
    WithdrawalPreset {
        balance_check: BalanceCheck::After,
        ..preset("ledger-sync")
    },
    preset("telegram-notify"),
];

/// Look up a preset by id
pub fn find(id: &str) -> Option<&'static WithdrawalPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WithdrawalError {
    #[error("unknown strategy: {0}")]
    UnknownPreset(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("missing {0}")]
    MissingDestination(&'static str),

    #[error("invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("split destinations must be distinct, {0} appears twice")]
    DuplicateDestination(Address),

    #[error("no destination given and no default payout configured")]
    NoPayoutDestination,

    #[error("insufficient balance: need {needed} wei, have {available} wei")]
    InsufficientBalance { needed: U256, available: U256 },

    #[error("balance query failed: {0}")]
    Balance(#[source] RpcManagerError),
}

impl WithdrawalError {
    /// Errors in the request itself, as opposed to the chain's state
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            WithdrawalError::UnknownPreset(_)
                | WithdrawalError::InvalidAmount(_)
                | WithdrawalError::MissingDestination(_)
                | WithdrawalError::InvalidDestination(_)
                | WithdrawalError::DuplicateDestination(_)
        )
    }
}

/// One transfer of a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalLeg {
    pub to: Address,
    pub value: U256,
}

/// Parse a decimal ether amount such as `"0.25"` into wei
pub fn parse_amount_eth(amount: &str) -> Result<U256, WithdrawalError> {
    let trimmed = amount.trim();
    if trimmed.starts_with('-') {
        return Err(WithdrawalError::InvalidAmount(format!(
            "{} is negative",
            trimmed
        )));
    }
    let wei = parse_ether(trimmed)
        .map_err(|e| WithdrawalError::InvalidAmount(format!("{}: {}", trimmed, e)))?;
    if wei.is_zero() {
        return Err(WithdrawalError::InvalidAmount("amount must be > 0".to_string()));
    }
    Ok(wei)
}

impl WithdrawalPreset {
    /// Resolve destinations and per-leg amounts.
    ///
    /// Split legs receive `amount / legs` wei each; the integer division
    /// remainder stays in the treasury.
    pub fn plan(
        &self,
        amount: U256,
        destination: Option<Address>,
        aux_destination: Option<Address>,
        payout: Option<Address>,
    ) -> Result<Vec<WithdrawalLeg>, WithdrawalError> {
        if amount.is_zero() {
            return Err(WithdrawalError::InvalidAmount("amount must be > 0".to_string()));
        }

        match self.destination {
            DestinationRule::ExplicitOrPayout => {
                let to = destination
                    .or(payout)
                    .ok_or(WithdrawalError::NoPayoutDestination)?;
                Ok(vec![WithdrawalLeg { to, value: amount }])
            }
            DestinationRule::Split { legs } => {
                let first = destination.ok_or(WithdrawalError::MissingDestination("destination"))?;
                let second =
                    aux_destination.ok_or(WithdrawalError::MissingDestination("auxDestination"))?;
                let third = payout.ok_or(WithdrawalError::NoPayoutDestination)?;

                let targets = [first, second, third];
                for (i, a) in targets.iter().enumerate() {
                    if targets[i + 1..].contains(a) {
                        return Err(WithdrawalError::DuplicateDestination(*a));
                    }
                }

                let per_leg = amount / U256::from(legs);
                if per_leg.is_zero() {
                    return Err(WithdrawalError::InvalidAmount(format!(
                        "{} wei cannot be split {} ways",
                        amount, legs
                    )));
                }

                Ok(targets
                    .iter()
                    .cycle()
                    .take(legs as usize)
                    .map(|&to| WithdrawalLeg { to, value: per_leg })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn test_all_twelve_presets_present() {
        let ids: Vec<&str> = PRESETS.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            [
                "standard-eoa",
                "check-before",
                "check-after",
                "two-factor-auth",
                "contract-call",
                "timed-release",
                "micro-split-3",
                "consolidate-multi",
                "max-priority",
                "low-base-only",
                "ledger-sync",
                "telegram-notify",
            ]
        );
        assert!(find("micro-split-3").is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn test_fee_overrides() {
        assert_eq!(find("contract-call").unwrap().fees.gas_limit, Some(100_000));
        assert_eq!(
            find("max-priority").unwrap().fees.priority_fee_wei,
            Some(2_000_000_000)
        );
        assert_eq!(find("low-base-only").unwrap().fees.priority_fee_wei, Some(0));
        assert_eq!(find("standard-eoa").unwrap().fees, FeePolicy::DEFAULT);
    }

    #[test]
    fn test_explicit_destination_wins_over_payout() {
        let p = find("standard-eoa").unwrap();
        let legs = p.plan(U256::from(10u64), Some(addr(1)), None, Some(addr(9))).unwrap();
        assert_eq!(legs, vec![WithdrawalLeg { to: addr(1), value: U256::from(10u64) }]);

        let legs = p.plan(U256::from(10u64), None, None, Some(addr(9))).unwrap();
        assert_eq!(legs[0].to, addr(9));

        assert_eq!(
            p.plan(U256::from(10u64), None, None, None),
            Err(WithdrawalError::NoPayoutDestination)
        );
    }

    #[test]
    fn test_split_three_ways_to_distinct_destinations() {
        let p = find("micro-split-3").unwrap();
        let amount = parse_amount_eth("0.3").unwrap();
        let legs = p.plan(amount, Some(addr(1)), Some(addr(2)), Some(addr(3))).unwrap();

        assert_eq!(legs.len(), 3);
        let third = U256::from(100_000_000_000_000_000u128);
        assert!(legs.iter().all(|l| l.value == third));
        assert_eq!(
            legs.iter().map(|l| l.to).collect::<Vec<_>>(),
            vec![addr(1), addr(2), addr(3)]
        );
    }

    #[test]
    fn test_split_rounds_down_and_validates() {
        let p = find("micro-split-3").unwrap();
        let legs = p
            .plan(U256::from(10u64), Some(addr(1)), Some(addr(2)), Some(addr(3)))
            .unwrap();
        assert!(legs.iter().all(|l| l.value == U256::from(3u64)));

        assert_eq!(
            p.plan(U256::from(10u64), Some(addr(1)), Some(addr(1)), Some(addr(3))),
            Err(WithdrawalError::DuplicateDestination(addr(1)))
        );
        assert_eq!(
            p.plan(U256::from(10u64), Some(addr(1)), None, Some(addr(3))),
            Err(WithdrawalError::MissingDestination("auxDestination"))
        );
        assert!(matches!(
            p.plan(U256::from(2u64), Some(addr(1)), Some(addr(2)), Some(addr(3))),
            Err(WithdrawalError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount_eth(" 1.5 ").unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert!(parse_amount_eth("0").is_err());
        assert!(parse_amount_eth("-1").is_err());
        assert!(parse_amount_eth("abc").is_err());
    }
}

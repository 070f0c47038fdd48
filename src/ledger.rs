//! Process-wide running totals of realized gains and withdrawn value.
//!
//! Values are held as micro-dollars in atomics so concurrent confirmations
//! never lose an update. Nothing is persisted or reconciled.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub earnings_usd: f64,
    pub withdrawn_usd: f64,
}

#[derive(Debug, Default)]
pub struct AccountingLedger {
    earnings_micros: AtomicU64,
    withdrawn_micros: AtomicU64,
}

fn to_micros(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    (usd * MICROS_PER_USD).round() as u64
}

impl AccountingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed strike
    pub fn credit_strike(&self, usd: f64) {
        self.earnings_micros
            .fetch_add(to_micros(usd), Ordering::Relaxed);
    }

    /// Record a confirmed withdrawal leg
    pub fn credit_withdrawal(&self, amount_eth: f64, reference_price_usd: f64) {
        self.withdrawn_micros
            .fetch_add(to_micros(amount_eth * reference_price_usd), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LedgerTotals {
        LedgerTotals {
            earnings_usd: self.earnings_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD,
            withdrawn_usd: self.withdrawn_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_credits_accumulate() {
        let ledger = AccountingLedger::new();
        ledger.credit_strike(1.5);
        ledger.credit_strike(1.5);
        ledger.credit_withdrawal(0.5, 3913.0);

        let totals = ledger.snapshot();
        assert!((totals.earnings_usd - 3.0).abs() < 1e-9);
        assert!((totals.withdrawn_usd - 1956.5).abs() < 1e-9);
    }

    #[test]
    fn test_nonsense_amounts_ignored() {
        let ledger = AccountingLedger::new();
        ledger.credit_strike(f64::NAN);
        ledger.credit_strike(-4.0);
        assert_eq!(ledger.snapshot().earnings_usd, 0.0);
    }

    #[test]
    fn test_concurrent_credits() {
        let ledger = Arc::new(AccountingLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.credit_strike(1.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!((ledger.snapshot().earnings_usd - 12_000.0).abs() < 1e-6);
    }
}

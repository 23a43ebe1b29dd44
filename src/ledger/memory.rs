//! In-Memory Ledger
//!
//! Same guard semantics as the Postgres ledger, under a single mutex so each
//! mutator is one atomic check-and-update. Used by tests and standalone mode.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{Ledger, LedgerError, SellerBalance};

#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<i64, SellerBalance>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a seller's balance figures (test/bootstrap helper)
    pub async fn seed(
        &self,
        seller_id: i64,
        balance: Decimal,
        locked_balance: Decimal,
        pending_balance: Decimal,
    ) {
        let mut balances = self.balances.lock().await;
        balances.insert(
            seller_id,
            SellerBalance {
                seller_id,
                balance,
                locked_balance,
                pending_balance,
            },
        );
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, seller_id: i64) -> Result<SellerBalance, LedgerError> {
        let balances = self.balances.lock().await;
        balances
            .get(&seller_id)
            .copied()
            .ok_or(LedgerError::SellerNotFound(seller_id))
    }

    async fn reserve(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().await;
        let entry = balances
            .get_mut(&seller_id)
            .ok_or(LedgerError::SellerNotFound(seller_id))?;

        if entry.withdrawable() < amount {
            return Err(LedgerError::InsufficientWithdrawable);
        }
        entry.locked_balance += amount;
        Ok(())
    }

    async fn release(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().await;
        let entry = balances
            .get_mut(&seller_id)
            .ok_or(LedgerError::SellerNotFound(seller_id))?;

        if entry.locked_balance < amount {
            return Err(LedgerError::ReservationUnderflow);
        }
        entry.locked_balance -= amount;
        Ok(())
    }

    async fn commit(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let mut balances = self.balances.lock().await;
        let entry = balances
            .get_mut(&seller_id)
            .ok_or(LedgerError::SellerNotFound(seller_id))?;

        if entry.locked_balance < amount {
            return Err(LedgerError::ReservationUnderflow);
        }
        entry.balance -= amount;
        entry.locked_balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    async fn seeded(balance: i64, locked: i64, pending: i64) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.seed(1001, dec(balance), dec(locked), dec(pending)).await;
        ledger
    }

    #[tokio::test]
    async fn test_reserve_respects_withdrawable_floor() {
        let ledger = seeded(1000, 0, 800).await;

        // withdrawable = 1000 - 0 - 800 = 200
        assert!(matches!(
            ledger.reserve(1001, dec(300)).await,
            Err(LedgerError::InsufficientWithdrawable)
        ));
        ledger.reserve(1001, dec(200)).await.unwrap();

        let b = ledger.get(1001).await.unwrap();
        assert_eq!(b.locked_balance, dec(200));
        assert_eq!(b.withdrawable(), dec(0));
    }

    #[tokio::test]
    async fn test_release_and_commit_guards() {
        let ledger = seeded(1000, 0, 0).await;

        assert!(matches!(
            ledger.release(1001, dec(1)).await,
            Err(LedgerError::ReservationUnderflow)
        ));
        assert!(matches!(
            ledger.commit(1001, dec(1)).await,
            Err(LedgerError::ReservationUnderflow)
        ));

        ledger.reserve(1001, dec(300)).await.unwrap();
        ledger.commit(1001, dec(300)).await.unwrap();

        let b = ledger.get(1001).await.unwrap();
        assert_eq!(b.balance, dec(700));
        assert_eq!(b.locked_balance, dec(0));
    }

    #[tokio::test]
    async fn test_unknown_seller() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.reserve(42, dec(1)).await,
            Err(LedgerError::SellerNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_overdraw() {
        let ledger = Arc::new(seeded(1000, 0, 0).await);

        // 20 tasks each trying to reserve 100 against withdrawable 1000:
        // exactly 10 may win.
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.reserve(1001, dec(100)).await.is_ok()
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }

        assert_eq!(wins, 10);
        let b = ledger.get(1001).await.unwrap();
        assert_eq!(b.locked_balance, dec(1000));
        assert!(b.withdrawable() >= dec(0));
    }
}

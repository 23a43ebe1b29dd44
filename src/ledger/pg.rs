//! PostgreSQL Ledger
//!
//! Each mutator is one `UPDATE` whose WHERE clause embeds the floor check;
//! `rows_affected == 0` distinguishes a failed guard from a missing row.
//! The `version` column bumps on every write for observability and to keep
//! row-level change detection cheap.

use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::{Ledger, LedgerError, SellerBalance};
use async_trait::async_trait;

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish "guard failed" from "seller missing" after a zero-row update
    async fn exists(&self, seller_id: i64) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM seller_balances_tb WHERE seller_id = $1")
            .bind(seller_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn get(&self, seller_id: i64) -> Result<SellerBalance, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT seller_id, balance, locked_balance, pending_balance
            FROM seller_balances_tb
            WHERE seller_id = $1
            "#,
        )
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::SellerNotFound(seller_id))?;

        Ok(SellerBalance {
            seller_id: row.get("seller_id"),
            balance: row.get::<Decimal, _>("balance"),
            locked_balance: row.get::<Decimal, _>("locked_balance"),
            pending_balance: row.get::<Decimal, _>("pending_balance"),
        })
    }

    async fn reserve(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE seller_balances_tb
            SET locked_balance = locked_balance + $1,
                version = version + 1,
                updated_at = NOW()
            WHERE seller_id = $2
              AND balance - locked_balance - pending_balance >= $1
            "#,
        )
        .bind(amount)
        .bind(seller_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if self.exists(seller_id).await? {
            Err(LedgerError::InsufficientWithdrawable)
        } else {
            Err(LedgerError::SellerNotFound(seller_id))
        }
    }

    async fn release(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE seller_balances_tb
            SET locked_balance = locked_balance - $1,
                version = version + 1,
                updated_at = NOW()
            WHERE seller_id = $2
              AND locked_balance >= $1
            "#,
        )
        .bind(amount)
        .bind(seller_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if self.exists(seller_id).await? {
            Err(LedgerError::ReservationUnderflow)
        } else {
            Err(LedgerError::SellerNotFound(seller_id))
        }
    }

    async fn commit(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE seller_balances_tb
            SET balance = balance - $1,
                locked_balance = locked_balance - $1,
                version = version + 1,
                updated_at = NOW()
            WHERE seller_id = $2
              AND locked_balance >= $1
            "#,
        )
        .bind(amount)
        .bind(seller_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if self.exists(seller_id).await? {
            Err(LedgerError::ReservationUnderflow)
        } else {
            Err(LedgerError::SellerNotFound(seller_id))
        }
    }
}

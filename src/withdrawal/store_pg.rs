//! PostgreSQL Withdrawal Store
//!
//! Runtime-bound queries; CAS updates use `rows_affected` as the atomicity
//! signal. The audit trail is a JSONB array appended with `||` so prior
//! actor blocks are never rewritten. The one-active-request-per-seller
//! invariant is backed by the partial unique index in `sql/schema.sql`.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::error::WithdrawalError;
use super::state::WithdrawalStatus;
use super::store::{ListFilter, WithdrawalStore};
use super::types::{
    AuditEntry, PaymentDetails, PayoutMethod, WithdrawalId, WithdrawalRecord,
};

/// Name of the partial unique index enforcing the exclusivity invariant
const EXCLUSIVITY_INDEX: &str = "withdrawal_requests_one_active_per_seller";

const SELECT_COLUMNS: &str = r#"
    id, seller_id, amount, method, details, status, is_active,
    gateway_reference, gateway_transfer_code, rejection_reason,
    audit, attempt, error_message, ledger_settled,
    created_at, processed_at, updated_at
"#;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<WithdrawalRecord, WithdrawalError> {
        let id_str: String = row.get("id");
        let id: WithdrawalId = id_str
            .parse()
            .map_err(|_| WithdrawalError::SystemError(format!("Invalid withdrawal id: {id_str}")))?;

        let status_id: i16 = row.get("status");
        let status = WithdrawalStatus::from_id(status_id).ok_or_else(|| {
            WithdrawalError::SystemError(format!("Invalid status ID: {status_id}"))
        })?;

        let method_str: String = row.get("method");
        let method = PayoutMethod::parse(&method_str).ok_or_else(|| {
            WithdrawalError::SystemError(format!("Invalid payout method: {method_str}"))
        })?;

        let details: PaymentDetails = serde_json::from_value(row.get("details"))
            .map_err(|e| WithdrawalError::SystemError(format!("Invalid payment details: {e}")))?;

        let audit: Vec<AuditEntry> = serde_json::from_value(row.get("audit"))
            .map_err(|e| WithdrawalError::SystemError(format!("Invalid audit trail: {e}")))?;

        Ok(WithdrawalRecord {
            id,
            seller_id: row.get("seller_id"),
            amount: row.get::<Decimal, _>("amount"),
            method,
            details,
            status,
            is_active: row.get("is_active"),
            gateway_reference: row.get("gateway_reference"),
            gateway_transfer_code: row.get("gateway_transfer_code"),
            rejection_reason: row.get("rejection_reason"),
            audit,
            attempt: row.get("attempt"),
            error: row.get("error_message"),
            ledger_settled: row.get("ledger_settled"),
            created_at: row.get("created_at"),
            processed_at: row.get("processed_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// The partial unique index fires on INSERTs and on UPDATEs into an
    /// exclusive status alike; both surface as `AnotherActiveRequest`.
    fn map_exclusivity_error(e: sqlx::Error) -> WithdrawalError {
        if let sqlx::Error::Database(db_err) = &e
            && db_err.constraint() == Some(EXCLUSIVITY_INDEX)
        {
            return WithdrawalError::AnotherActiveRequest;
        }
        WithdrawalError::from(e)
    }
}

#[async_trait]
impl WithdrawalStore for PgStore {
    async fn create(&self, record: &WithdrawalRecord) -> Result<(), WithdrawalError> {
        let details = serde_json::to_value(&record.details)
            .map_err(|e| WithdrawalError::SystemError(e.to_string()))?;
        let audit = serde_json::to_value(&record.audit)
            .map_err(|e| WithdrawalError::SystemError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO withdrawal_requests_tb
                (id, seller_id, amount, method, details, status, is_active,
                 audit, attempt, created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.seller_id)
        .bind(record.amount)
        .bind(record.method.as_str())
        .bind(details)
        .bind(record.status.id())
        .bind(record.is_active)
        .bind(audit)
        .bind(record.attempt)
        .execute(&self.pool)
        .await
        .map_err(Self::map_exclusivity_error)?;

        Ok(())
    }

    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRecord>, WithdrawalError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM withdrawal_requests_tb WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM withdrawal_requests_tb
            WHERE ($1::BIGINT IS NULL OR seller_id = $1)
              AND ($2::SMALLINT IS NULL OR status = $2)
              AND ($3::BOOLEAN IS NULL OR is_active = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.seller_id)
        .bind(filter.status.map(|s| s.id()))
        .bind(filter.is_active)
        .bind(if filter.limit > 0 { filter.limit } else { 50 })
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn count(&self, filter: &ListFilter) -> Result<i64, WithdrawalError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM withdrawal_requests_tb
            WHERE ($1::BIGINT IS NULL OR seller_id = $1)
              AND ($2::SMALLINT IS NULL OR status = $2)
              AND ($3::BOOLEAN IS NULL OR is_active = $3)
            "#,
        )
        .bind(filter.seller_id)
        .bind(filter.status.map(|s| s.id()))
        .bind(filter.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_status_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET status = $1,
                processed_at = CASE WHEN $1 = $4 THEN NOW() ELSE processed_at END,
                ledger_settled = CASE WHEN $1 = $4 THEN FALSE ELSE ledger_settled END,
                updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new.id())
        .bind(id.to_string())
        .bind(expected.id())
        .bind(WithdrawalStatus::Paid.id())
        .execute(&self.pool)
        .await
        .map_err(Self::map_exclusivity_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status_with_error(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        error: &str,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET status = $1,
                error_message = $2,
                ledger_settled = CASE WHEN $1 = $5 THEN FALSE ELSE ledger_settled END,
                updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(new.id())
        .bind(error)
        .bind(id.to_string())
        .bind(expected.id())
        .bind(WithdrawalStatus::Failed.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status_with_refs(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        reference: &str,
        transfer_code: &str,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET status = $1,
                gateway_reference = $2,
                gateway_transfer_code = $3,
                processed_at = CASE WHEN $1 = $6 THEN NOW() ELSE processed_at END,
                ledger_settled = CASE WHEN $1 = $6 THEN FALSE ELSE ledger_settled END,
                updated_at = NOW()
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(new.id())
        .bind(reference)
        .bind(transfer_code)
        .bind(id.to_string())
        .bind(expected.id())
        .bind(WithdrawalStatus::Paid.id())
        .execute(&self.pool)
        .await
        .map_err(Self::map_exclusivity_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status_bump_attempt_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET status = $1, attempt = attempt + 1, error_message = NULL, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new.id())
        .bind(id.to_string())
        .bind(expected.id())
        .execute(&self.pool)
        .await
        .map_err(Self::map_exclusivity_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reject_if_pending(
        &self,
        id: WithdrawalId,
        reason: &str,
    ) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET status = $1, rejection_reason = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(WithdrawalStatus::Rejected.id())
        .bind(reason)
        .bind(id.to_string())
        .bind(WithdrawalStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_if_pending(&self, id: WithdrawalId) -> Result<bool, WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND status = $2 AND is_active = TRUE
            "#,
        )
        .bind(id.to_string())
        .bind(WithdrawalStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_audit(
        &self,
        id: WithdrawalId,
        entry: &AuditEntry,
    ) -> Result<(), WithdrawalError> {
        let block = serde_json::to_value(entry)
            .map_err(|e| WithdrawalError::SystemError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET audit = audit || jsonb_build_array($1::jsonb), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(block)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WithdrawalError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_other_exclusive(
        &self,
        seller_id: i64,
        excluding: WithdrawalId,
    ) -> Result<Option<WithdrawalId>, WithdrawalError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM withdrawal_requests_tb
            WHERE seller_id = $1 AND id <> $2 AND is_active AND status IN ($3, $4, $5)
            LIMIT 1
            "#,
        )
        .bind(seller_id)
        .bind(excluding.to_string())
        .bind(WithdrawalStatus::Pending.id())
        .bind(WithdrawalStatus::Processing.id())
        .bind(WithdrawalStatus::AwaitingOtp.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let id_str: String = row.get("id");
                let id = id_str.parse().map_err(|_| {
                    WithdrawalError::SystemError(format!("Invalid withdrawal id: {id_str}"))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let threshold_secs = threshold.as_secs() as i64;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM withdrawal_requests_tb
            WHERE status NOT IN ($1, $2, $3)
              AND gateway_transfer_code IS NOT NULL
              AND updated_at < NOW() - INTERVAL '1 second' * $4
            ORDER BY updated_at ASC
            LIMIT $5
            "#
        ))
        .bind(WithdrawalStatus::Paid.id())
        .bind(WithdrawalStatus::Rejected.id())
        .bind(WithdrawalStatus::Failed.id())
        .bind(threshold_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn mark_ledger_settled(&self, id: WithdrawalId) -> Result<(), WithdrawalError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests_tb
            SET ledger_settled = TRUE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WithdrawalError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn find_unsettled(
        &self,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM withdrawal_requests_tb
            WHERE NOT ledger_settled
            ORDER BY updated_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Self::row_to_record(&row)?);
        }
        Ok(records)
    }
}

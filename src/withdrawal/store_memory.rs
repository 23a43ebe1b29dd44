//! In-Memory Withdrawal Store
//!
//! Mirrors the Postgres store's CAS semantics under a single mutex. Used by
//! tests and standalone mode; the exclusivity invariant is enforced inside
//! the lock, matching the partial unique index in `sql/schema.sql`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::error::WithdrawalError;
use super::state::WithdrawalStatus;
use super::store::{ListFilter, WithdrawalStore};
use super::types::{AuditEntry, WithdrawalId, WithdrawalRecord};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<WithdrawalId, WithdrawalRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Another active request in an exclusive status for the same seller.
/// Mirrors what the partial unique index guards in Postgres: INSERTs and
/// UPDATEs into an exclusive status alike.
fn other_active_exclusive(
    records: &HashMap<WithdrawalId, WithdrawalRecord>,
    seller_id: i64,
    excluding: WithdrawalId,
) -> bool {
    records.values().any(|r| {
        r.seller_id == seller_id && r.status.is_exclusive() && r.is_active && r.id != excluding
    })
}

fn matches_filter(record: &WithdrawalRecord, filter: &ListFilter) -> bool {
    if let Some(seller_id) = filter.seller_id
        && record.seller_id != seller_id
    {
        return false;
    }
    if let Some(status) = filter.status
        && record.status != status
    {
        return false;
    }
    if let Some(is_active) = filter.is_active
        && record.is_active != is_active
    {
        return false;
    }
    true
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn create(&self, record: &WithdrawalRecord) -> Result<(), WithdrawalError> {
        let mut records = self.records.lock().await;

        if other_active_exclusive(&records, record.seller_id, record.id) {
            return Err(WithdrawalError::AnotherActiveRequest);
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRecord>, WithdrawalError> {
        let records = self.records.lock().await;
        Ok(records.get(&id).cloned())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let records = self.records.lock().await;
        let mut matched: Vec<WithdrawalRecord> = records
            .values()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        // Newest first, like the Postgres ORDER BY created_at DESC
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.max(0) as usize;
        // Same default page size as the Postgres store
        let limit = if filter.limit > 0 { filter.limit } else { 50 } as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filter: &ListFilter) -> Result<i64, WithdrawalError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| matches_filter(r, filter)).count() as i64)
    }

    async fn update_status_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        if new.is_exclusive() {
            let Some(record) = records.get(&id) else {
                return Ok(false);
            };
            if other_active_exclusive(&records, record.seller_id, id) {
                return Err(WithdrawalError::AnotherActiveRequest);
            }
        }
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = new;
        record.updated_at = Utc::now();
        if new == WithdrawalStatus::Paid {
            record.processed_at = Some(record.updated_at);
            record.ledger_settled = false;
        }
        Ok(true)
    }

    async fn update_status_with_error(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        error: &str,
    ) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = new;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();
        if new == WithdrawalStatus::Failed {
            record.ledger_settled = false;
        }
        Ok(true)
    }

    async fn update_status_with_refs(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        reference: &str,
        transfer_code: &str,
    ) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = new;
        record.gateway_reference = Some(reference.to_string());
        record.gateway_transfer_code = Some(transfer_code.to_string());
        record.updated_at = Utc::now();
        if new == WithdrawalStatus::Paid {
            record.processed_at = Some(record.updated_at);
            record.ledger_settled = false;
        }
        Ok(true)
    }

    async fn update_status_bump_attempt_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        if new.is_exclusive() {
            let Some(record) = records.get(&id) else {
                return Ok(false);
            };
            if other_active_exclusive(&records, record.seller_id, id) {
                return Err(WithdrawalError::AnotherActiveRequest);
            }
        }
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = new;
        record.attempt += 1;
        record.error = None;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn reject_if_pending(
        &self,
        id: WithdrawalId,
        reason: &str,
    ) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != WithdrawalStatus::Pending {
            return Ok(false);
        }
        record.status = WithdrawalStatus::Rejected;
        record.rejection_reason = Some(reason.to_string());
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn deactivate_if_pending(&self, id: WithdrawalId) -> Result<bool, WithdrawalError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != WithdrawalStatus::Pending || !record.is_active {
            return Ok(false);
        }
        record.is_active = false;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn append_audit(
        &self,
        id: WithdrawalId,
        entry: &AuditEntry,
    ) -> Result<(), WithdrawalError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| WithdrawalError::NotFound(id.to_string()))?;
        record.audit.push(entry.clone());
        Ok(())
    }

    async fn find_other_exclusive(
        &self,
        seller_id: i64,
        excluding: WithdrawalId,
    ) -> Result<Option<WithdrawalId>, WithdrawalError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| {
                r.seller_id == seller_id
                    && r.status.is_exclusive()
                    && r.is_active
                    && r.id != excluding
            })
            .map(|r| r.id))
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| WithdrawalError::SystemError(e.to_string()))?;

        let records = self.records.lock().await;
        let mut stale: Vec<WithdrawalRecord> = records
            .values()
            .filter(|r| {
                !r.status.is_terminal()
                    && r.gateway_transfer_code.is_some()
                    && r.updated_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn mark_ledger_settled(&self, id: WithdrawalId) -> Result<(), WithdrawalError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| WithdrawalError::NotFound(id.to_string()))?;
        record.ledger_settled = true;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_unsettled(
        &self,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError> {
        let records = self.records.lock().await;
        let mut unsettled: Vec<WithdrawalRecord> = records
            .values()
            .filter(|r| !r.ledger_settled)
            .cloned()
            .collect();
        unsettled.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        unsettled.truncate(limit.max(0) as usize);
        Ok(unsettled)
    }
}

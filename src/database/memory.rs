//! In-process ledger and order store used when `SKIP_EXTERNALS=true` and in
//! tests. Same transition rules as the Postgres repositories.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    LedgerRow, NewLedgerEntry, OrderStore, StatusUpdate, TransactionLedger,
};
use crate::payments::types::LedgerStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, LedgerRow>>,
    confirmed_orders: RwLock<Vec<Uuid>>,
    activated_subscriptions: RwLock<Vec<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row(&self, reference: &str) -> Option<LedgerRow> {
        self.rows.read().await.get(reference).cloned()
    }

    /// Every confirmation call, in order, including repeats.
    pub async fn confirmed_orders(&self) -> Vec<Uuid> {
        self.confirmed_orders.read().await.clone()
    }

    pub async fn activated_subscriptions(&self) -> Vec<Uuid> {
        self.activated_subscriptions.read().await.clone()
    }
}

#[async_trait]
impl TransactionLedger for MemoryStore {
    async fn record_pending(&self, entry: NewLedgerEntry) -> Result<LedgerRow, DatabaseError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entry.reference) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: Some("payment_transactions_reference_key".to_string()),
            }));
        }

        let now = Utc::now();
        let row = LedgerRow {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            order_id: entry.order_id,
            subscription_id: entry.subscription_id,
            amount: entry.amount,
            currency: entry.currency,
            network: entry.network,
            phone_number: entry.phone_number,
            reference: entry.reference.clone(),
            provider_transaction_id: entry.provider_transaction_id,
            status: LedgerStatus::Pending.as_str().to_string(),
            description: Some(entry.description),
            created_at: now,
            updated_at: now,
        };
        rows.insert(entry.reference, row.clone());
        Ok(row)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<LedgerRow>, DatabaseError> {
        Ok(self
            .rows
            .read()
            .await
            .get(reference)
            .filter(|row| row.user_id == user_id)
            .cloned())
    }

    async fn apply_status(
        &self,
        reference: &str,
        user_id: Uuid,
        status: LedgerStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<StatusUpdate, DatabaseError> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(reference).filter(|row| row.user_id == user_id) else {
            return Ok(StatusUpdate::Missing);
        };

        let previous = row.ledger_status();
        if !previous.can_transition_to(status) {
            return Ok(StatusUpdate::Ignored { current: previous });
        }

        row.status = status.as_str().to_string();
        if row.provider_transaction_id.is_none() {
            row.provider_transaction_id = provider_transaction_id.map(str::to_string);
        }
        row.updated_at = Utc::now();

        Ok(StatusUpdate::Applied {
            previous,
            row: row.clone(),
        })
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn confirm_order(&self, order_id: Uuid) -> Result<bool, DatabaseError> {
        self.confirmed_orders.write().await.push(order_id);
        Ok(true)
    }

    async fn activate_subscription(&self, subscription_id: Uuid) -> Result<bool, DatabaseError> {
        self.activated_subscriptions
            .write()
            .await
            .push(subscription_id);
        Ok(true)
    }
}

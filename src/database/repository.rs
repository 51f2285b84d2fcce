//! Storage seams used by the payment orchestrator.
//!
//! Postgres implementations live next to this module; [`super::memory`]
//! provides an in-process implementation for local runs and tests.

use crate::database::error::DatabaseError;
use crate::payments::types::LedgerStatus;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// One row of `payment_transactions`, keyed by `reference`.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct LedgerRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub network: String,
    pub phone_number: String,
    pub reference: String,
    #[sqlx(rename = "clickpesa_reference")]
    pub provider_transaction_id: Option<String>,
    pub status: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRow {
    /// Unknown values read back from the table are treated as in flight.
    pub fn ledger_status(&self) -> LedgerStatus {
        LedgerStatus::from_str(&self.status).unwrap_or(LedgerStatus::Processing)
    }
}

/// Insert payload for a freshly initiated payment.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub network: String,
    pub phone_number: String,
    pub reference: String,
    pub provider_transaction_id: Option<String>,
    pub description: String,
}

/// Outcome of a conditional status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// No row for this reference and user
    Missing,
    /// Row is terminal (or the move is not allowed); nothing written
    Ignored { current: LedgerStatus },
    Applied {
        previous: LedgerStatus,
        row: LedgerRow,
    },
}

impl StatusUpdate {
    /// True only for the write that moved the row into `completed`.
    pub fn completed_now(&self) -> bool {
        match self {
            StatusUpdate::Applied { previous, row } => {
                *previous != LedgerStatus::Completed
                    && row.ledger_status() == LedgerStatus::Completed
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn record_pending(&self, entry: NewLedgerEntry) -> Result<LedgerRow, DatabaseError>;

    async fn find_by_reference(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<LedgerRow>, DatabaseError>;

    /// Move the row to `status` unless it is already terminal. A provided
    /// `provider_transaction_id` is only stored when the row has none.
    async fn apply_status(
        &self,
        reference: &str,
        user_id: Uuid,
        status: LedgerStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<StatusUpdate, DatabaseError>;
}

/// Orders and seller subscriptions are owned elsewhere; only their status
/// column is touched here.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Returns whether a row was updated.
    async fn confirm_order(&self, order_id: Uuid) -> Result<bool, DatabaseError>;

    async fn activate_subscription(&self, subscription_id: Uuid) -> Result<bool, DatabaseError>;
}

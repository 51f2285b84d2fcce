use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    LedgerRow, NewLedgerEntry, StatusUpdate, TransactionLedger,
};
use crate::payments::types::LedgerStatus;
use async_trait::async_trait;
use sqlx::PgPool;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const LEDGER_COLUMNS: &str = "id, user_id, order_id, subscription_id, amount, currency, network, \
     phone_number, reference, clickpesa_reference, status, description, created_at, updated_at";

/// Postgres-backed payment ledger (`payment_transactions`)
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLedger for LedgerRepository {
    async fn record_pending(&self, entry: NewLedgerEntry) -> Result<LedgerRow, DatabaseError> {
        sqlx::query_as::<_, LedgerRow>(&format!(
            "INSERT INTO payment_transactions \
             (user_id, order_id, subscription_id, amount, currency, network, phone_number, \
              reference, clickpesa_reference, status, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10) \
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(entry.user_id)
        .bind(entry.order_id)
        .bind(entry.subscription_id)
        .bind(&entry.amount)
        .bind(&entry.currency)
        .bind(&entry.network)
        .bind(&entry.phone_number)
        .bind(&entry.reference)
        .bind(&entry.provider_transaction_id)
        .bind(&entry.description)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<LedgerRow>, DatabaseError> {
        sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE reference = $1 AND user_id = $2",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn apply_status(
        &self,
        reference: &str,
        user_id: Uuid,
        status: LedgerStatus,
        provider_transaction_id: Option<&str>,
    ) -> Result<StatusUpdate, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Row lock serialises concurrent status checks for the same reference.
        let current: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM payment_transactions \
             WHERE reference = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(reference)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some((current,)) = current else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(StatusUpdate::Missing);
        };

        let previous = LedgerStatus::from_str(&current).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: e.to_string(),
            })
        })?;

        if !previous.can_transition_to(status) {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            debug!(reference, current = %previous, requested = %status, "status write skipped");
            return Ok(StatusUpdate::Ignored { current: previous });
        }

        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "UPDATE payment_transactions \
             SET status = $3, \
                 clickpesa_reference = COALESCE(clickpesa_reference, $4), \
                 updated_at = NOW() \
             WHERE reference = $1 AND user_id = $2 \
             RETURNING {}",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .bind(user_id)
        .bind(status.as_str())
        .bind(provider_transaction_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(StatusUpdate::Applied { previous, row })
    }
}

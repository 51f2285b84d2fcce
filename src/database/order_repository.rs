use crate::database::error::DatabaseError;
use crate::database::repository::OrderStore;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Status side effects on `orders` and `seller_subscriptions`
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn confirm_order(&self, order_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE orders SET status = 'confirmed' WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn activate_subscription(&self, subscription_id: Uuid) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE seller_subscriptions SET status = 'active' WHERE id = $1")
                .bind(subscription_id)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

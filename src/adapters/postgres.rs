use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::OrderStore;
use crate::domain::{Dex, Order, OrderPatch, OrderStatus, OrderType};
use crate::error::{EngineError, Result};

/// PostgreSQL order store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool (zero-cost reuse)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool (graceful shutdown)
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
        let order_type: String = row.get("order_type");
        let status: String = row.get("status");
        let dex_used: Option<String> = row.get("dex_used");

        Ok(Order {
            order_id: row.get("order_id"),
            order_type: OrderType::try_from(order_type.as_str())
                .map_err(EngineError::Internal)?,
            token_in: row.get("token_in"),
            token_out: row.get("token_out"),
            amount_in: row.get::<Decimal, _>("amount_in"),
            slippage: row.get::<Decimal, _>("slippage"),
            status: OrderStatus::try_from(status.as_str()).map_err(EngineError::Internal)?,
            dex_used: dex_used
                .as_deref()
                .map(Dex::try_from)
                .transpose()
                .map_err(EngineError::Internal)?,
            executed_price: row.get("executed_price"),
            amount_out: row.get("amount_out"),
            tx_hash: row.get("tx_hash"),
            error: row.get("error"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn save(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, order_type, token_in, token_out, amount_in, slippage,
                status, dex_used, executed_price, amount_out, tx_hash, error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.order_id)
        .bind(order.order_type.as_str())
        .bind(&order.token_in)
        .bind(&order.token_out)
        .bind(order.amount_in)
        .bind(order.slippage)
        .bind(order.status.as_str())
        .bind(order.dex_used.map(|d| d.as_str()))
        .bind(order.executed_price)
        .bind(order.amount_out)
        .bind(&order.tx_hash)
        .bind(&order.error)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::Conflict(order.order_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<()> {
        // Single-row conditional update; per-id writes serialize on the row
        // lock. Unknown ids match zero rows and that is fine.
        sqlx::query(
            r#"
            UPDATE orders SET
                status = COALESCE($2, status),
                dex_used = COALESCE($3, dex_used),
                executed_price = COALESCE($4, executed_price),
                amount_out = COALESCE($5, amount_out),
                tx_hash = COALESCE($6, tx_hash),
                error = COALESCE($7, error),
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.dex_used.map(|d| d.as_str()))
        .bind(patch.executed_price)
        .bind(patch.amount_out)
        .bind(patch.tx_hash)
        .bind(patch.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, order_type, token_in, token_out, amount_in, slippage,
                   status, dex_used, executed_price, amount_out, tx_hash, error,
                   created_at, updated_at
            FROM orders WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::OrderStore;
use crate::domain::{Order, OrderPatch};
use crate::error::{EngineError, Result};

/// In-memory order store. Backs the integration tests and local runs
/// without a database; the single map mutex serializes per-id updates the
/// same way the Postgres row lock does.
#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn save(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.order_id) {
            return Err(EngineError::Conflict(order.order_id));
        }
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<()> {
        let mut orders = self.orders.lock().await;
        if let Some(order) = orders.get_mut(&order_id) {
            patch.apply(order);
        }
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(&order_id).cloned())
    }
}

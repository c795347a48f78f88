pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Order, OrderPatch};
use crate::error::Result;

/// Order persistence seam. The engine only ever needs these three
/// operations; workers, intake and the stream endpoint all go through an
/// `Arc<dyn OrderStore>` handle.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails with `EngineError::Conflict` if the id is
    /// already present.
    async fn save(&self, order: &Order) -> Result<()>;

    /// Partial update. Silently a no-op when the id is unknown so a
    /// late-arriving update after a forced clean cannot crash a worker.
    /// Always refreshes `updated_at`.
    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<()>;

    /// Fetch an order by id.
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>>;
}

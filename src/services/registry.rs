use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::OrderStatus;

/// One discrete JSON text frame on an order stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamFrame {
    pub fn new(order_id: Uuid, status: OrderStatus, data: Option<serde_json::Value>) -> Self {
        Self {
            order_id,
            status,
            data,
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

struct Entry {
    token: u64,
    tx: UnboundedSender<String>,
}

/// In-process map of order id to the single live client socket awaiting
/// that order. Workers publish through it; the stream endpoint registers
/// and deregisters. No buffering: publishing with no live socket drops the
/// update.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, Entry>>,
    next_token: std::sync::atomic::AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the socket's outbound channel for an order. A second
    /// registration for the same id replaces the first, closing its
    /// channel. Returns a token the owner passes back to `deregister` so a
    /// stale socket cannot evict its replacement.
    pub fn register(&self, order_id: Uuid, tx: UnboundedSender<String>) -> u64 {
        let token = self
            .next_token
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        connections.insert(order_id, Entry { token, tx });
        debug!(%order_id, "stream registered");
        token
    }

    /// Remove a registration if it still belongs to `token`.
    pub fn deregister(&self, order_id: Uuid, token: u64) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if connections.get(&order_id).is_some_and(|e| e.token == token) {
            connections.remove(&order_id);
            debug!(%order_id, "stream deregistered");
        }
    }

    /// Serialize and send a frame to the socket awaiting `order_id`, if
    /// any. Failures deregister the socket and are otherwise silent; a
    /// worker must never crash on a publish.
    pub fn publish(&self, order_id: Uuid, status: OrderStatus, data: Option<serde_json::Value>) {
        // Copy the sender handle out under the lock; never hold the lock
        // across the send.
        let tx = {
            let connections = self.connections.lock().expect("registry lock poisoned");
            match connections.get(&order_id) {
                Some(entry) => entry.tx.clone(),
                None => return,
            }
        };

        let frame = StreamFrame::new(order_id, status, data);
        match serde_json::to_string(&frame) {
            Ok(json) => {
                if tx.send(json).is_err() {
                    self.drop_entry(order_id);
                }
            }
            Err(e) => {
                warn!(%order_id, "failed to serialize stream frame: {}", e);
                self.drop_entry(order_id);
            }
        }
    }

    /// Actively close the stream for an order if still present. Dropping
    /// the sender ends the socket's forward task, which closes the socket.
    pub fn close(&self, order_id: Uuid) {
        self.drop_entry(order_id);
    }

    /// Close after a grace period, giving the client time to read the
    /// terminal frame.
    pub fn schedule_close(self: std::sync::Arc<Self>, order_id: Uuid, grace: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            self.close(order_id);
        });
    }

    /// Number of live registrations, for health checks.
    pub fn count(&self) -> usize {
        self.connections.lock().expect("registry lock poisoned").len()
    }

    fn drop_entry(&self, order_id: Uuid) {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if connections.remove(&order_id).is_some() {
            debug!(%order_id, "stream closed");
        }
    }
}

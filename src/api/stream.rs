use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::domain::{Order, OrderStatus};
use crate::services::StreamFrame;

const TERMINAL_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// GET /api/orders/{orderId}/stream — upgrade and bind the socket to the
/// order's lifecycle.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Path(order_id): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, order_id))
}

/// Synthetic first frame anchoring the client to the order's current
/// status.
pub(crate) fn anchor_frame(order: &Order) -> StreamFrame {
    StreamFrame::new(order.order_id, order.status, None).with_message(format!(
        "Connected to order stream (current status: {})",
        order.status
    ))
}

/// Replay frame for a stream opened after the order already reached a
/// terminal state.
pub(crate) fn terminal_frame(order: &Order) -> StreamFrame {
    let data = match order.status {
        OrderStatus::Confirmed => json!({
            "tx_hash": order.tx_hash,
            "executed_price": order.executed_price,
            "amount_out": order.amount_out,
            "dex_used": order.dex_used,
        }),
        _ => json!({ "error": order.error }),
    };
    StreamFrame::new(order.order_id, order.status, Some(data))
}

async fn handle_socket(socket: WebSocket, state: AppState, order_id: Uuid) {
    let mut socket = socket;

    let order = match state.store.get(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            let frame = json!({
                "orderId": order_id,
                "error": "Order not found",
                "timestamp": Utc::now(),
            });
            let _ = socket.send(Message::Text(frame.to_string())).await;
            let _ = socket.close().await;
            return;
        }
        Err(e) => {
            warn!(%order_id, "stream lookup failed: {}", e);
            let frame = json!({
                "orderId": order_id,
                "error": "Failed to load order",
                "timestamp": Utc::now(),
            });
            let _ = socket.send(Message::Text(frame.to_string())).await;
            let _ = socket.close().await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let token = state.registry.register(order_id, tx.clone());

    // Anchor the client before any worker publication can race ahead.
    if let Ok(json) = serde_json::to_string(&anchor_frame(&order)) {
        let _ = tx.send(json);
    }

    // Late connect: replay the persisted terminal state, then close.
    if order.status.is_terminal() {
        if let Ok(json) = serde_json::to_string(&terminal_frame(&order)) {
            let _ = tx.send(json);
        }
        state
            .registry
            .clone()
            .schedule_close(order_id, TERMINAL_CLOSE_GRACE);
    }
    drop(tx);

    // Forward registry publications to the wire. Ends when the registry
    // drops the sender (terminal close) or the client goes away.
    let send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Drain the client side; we only care about close.
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            // Axum answers pings automatically.
            _ => {}
        }
    }

    state.registry.deregister(order_id, token);
    send_task.abort();
    debug!(%order_id, "stream connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dex, OrderPatch, OrderType};
    use rust_decimal_macros::dec;

    fn confirmed_order() -> Order {
        let mut order = Order::new(
            OrderType::Market,
            "SOL".to_string(),
            "USDC".to_string(),
            dec!(1),
            None,
        );
        OrderPatch::status(OrderStatus::Confirmed)
            .with_dex_used(Dex::Raydium)
            .with_fill("mock_tx_1_abc".to_string(), dec!(99.5), dec!(99.5))
            .apply(&mut order);
        order
    }

    #[test]
    fn test_anchor_frame_carries_current_status() {
        let order = Order::new(
            OrderType::Market,
            "SOL".to_string(),
            "USDC".to_string(),
            dec!(1),
            None,
        );
        let frame = anchor_frame(&order);
        assert_eq!(frame.status, OrderStatus::Pending);
        assert!(frame.message.as_deref().unwrap().contains("pending"));
        assert!(frame.data.is_none());
    }

    #[test]
    fn test_terminal_frame_replays_confirmed_fill() {
        let order = confirmed_order();
        let frame = terminal_frame(&order);
        let data = frame.data.unwrap();

        assert_eq!(frame.status, OrderStatus::Confirmed);
        assert_eq!(data["tx_hash"], "mock_tx_1_abc");
        assert_eq!(data["dex_used"], "raydium");
        assert!(!data["executed_price"].is_null());
        assert!(!data["amount_out"].is_null());
    }

    #[test]
    fn test_terminal_frame_replays_failure() {
        let mut order = confirmed_order();
        order.status = OrderStatus::Failed;
        order.error = Some("Network congestion | Attempts: 3/3 | Failed at: now".to_string());

        let frame = terminal_frame(&order);
        let data = frame.data.unwrap();
        assert!(data["error"]
            .as_str()
            .unwrap()
            .contains("Attempts: 3/3"));
    }
}

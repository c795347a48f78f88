use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::api::types::*;
use crate::domain::{Order, OrderType};
use crate::error::EngineError;

/// Validate the intake body and build the pending order. Returns the
/// client-facing 400 message on rejection.
pub(crate) fn validate_request(req: ExecuteOrderRequest) -> Result<Order, String> {
    let order_type = req
        .order_type
        .as_deref()
        .ok_or_else(|| "Missing required field: orderType".to_string())?;
    let order_type = OrderType::try_from(order_type)
        .map_err(|_| "Only market orders are supported in this implementation".to_string())?;
    if order_type != OrderType::Market {
        return Err("Only market orders are supported in this implementation".to_string());
    }

    let token_in = req
        .token_in
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "Missing required field: tokenIn".to_string())?;
    let token_out = req
        .token_out
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "Missing required field: tokenOut".to_string())?;
    let amount_in = req
        .amount_in
        .ok_or_else(|| "Missing required field: amountIn".to_string())?;
    if amount_in <= Decimal::ZERO {
        return Err("amountIn must be positive".to_string());
    }
    if let Some(slippage) = req.slippage {
        if slippage < Decimal::ZERO || slippage > Decimal::ONE {
            return Err("slippage must be within [0, 1]".to_string());
        }
    }

    Ok(Order::new(
        order_type,
        token_in,
        token_out,
        amount_in,
        req.slippage,
    ))
}

/// POST /api/orders/execute
pub async fn execute_order(
    State(state): State<AppState>,
    Json(req): Json<ExecuteOrderRequest>,
) -> Result<(StatusCode, Json<ExecuteOrderResponse>), (StatusCode, Json<ErrorResponse>)> {
    let order = validate_request(req)
        .map_err(|msg| (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))))?;
    let order_id = order.order_id;

    state.store.save(&order).await.map_err(|e| {
        error!(%order_id, "failed to persist order: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to persist order")),
        )
    })?;

    state.queue.enqueue(&order).await.map_err(|e| {
        error!(%order_id, "failed to enqueue order: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to enqueue order")),
        )
    })?;

    info!(
        %order_id,
        token_in = %order.token_in,
        token_out = %order.token_out,
        amount_in = %order.amount_in,
        "order accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(ExecuteOrderResponse {
            order_id,
            message: "Order accepted for execution".to_string(),
            websocket_url: format!("/api/orders/{order_id}/stream"),
            instructions: "Connect to websocketUrl to receive real-time status updates".to_string(),
        }),
    ))
}

/// GET /api/orders/{orderId}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, (StatusCode, Json<ErrorResponse>)> {
    match state.store.get(order_id).await {
        Ok(Some(order)) => Ok(Json(order)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                EngineError::OrderNotFound(order_id).to_string(),
            )),
        )),
        Err(e) => {
            error!(%order_id, "failed to load order: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to load order")),
            ))
        }
    }
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        queue: QueueHealth {
            active_connections: state.registry.count(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_request() -> ExecuteOrderRequest {
        ExecuteOrderRequest {
            order_type: Some("market".to_string()),
            token_in: Some("SOL".to_string()),
            token_out: Some("USDC".to_string()),
            amount_in: Some(dec!(1)),
            slippage: Some(dec!(0.01)),
        }
    }

    #[test]
    fn test_valid_request_builds_pending_order() {
        let order = validate_request(valid_request()).unwrap();
        assert_eq!(order.token_in, "SOL");
        assert_eq!(order.status, crate::domain::OrderStatus::Pending);
        assert_eq!(order.slippage, dec!(0.01));
    }

    #[test]
    fn test_non_market_order_rejected() {
        let req = ExecuteOrderRequest {
            order_type: Some("limit".to_string()),
            ..valid_request()
        };
        assert_eq!(
            validate_request(req).unwrap_err(),
            "Only market orders are supported in this implementation"
        );

        let req = ExecuteOrderRequest {
            order_type: Some("sniper".to_string()),
            ..valid_request()
        };
        assert!(validate_request(req).is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let req = ExecuteOrderRequest {
            token_in: None,
            ..valid_request()
        };
        assert_eq!(
            validate_request(req).unwrap_err(),
            "Missing required field: tokenIn"
        );

        let req = ExecuteOrderRequest {
            amount_in: None,
            ..valid_request()
        };
        assert_eq!(
            validate_request(req).unwrap_err(),
            "Missing required field: amountIn"
        );
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let req = ExecuteOrderRequest {
            amount_in: Some(dec!(0)),
            ..valid_request()
        };
        assert_eq!(validate_request(req).unwrap_err(), "amountIn must be positive");

        let req = ExecuteOrderRequest {
            amount_in: Some(dec!(-3)),
            ..valid_request()
        };
        assert!(validate_request(req).is_err());
    }

    #[test]
    fn test_slippage_out_of_range_rejected() {
        let req = ExecuteOrderRequest {
            slippage: Some(dec!(1.5)),
            ..valid_request()
        };
        assert_eq!(
            validate_request(req).unwrap_err(),
            "slippage must be within [0, 1]"
        );
    }

    #[test]
    fn test_slippage_defaults_when_absent() {
        let req = ExecuteOrderRequest {
            slippage: None,
            ..valid_request()
        };
        let order = validate_request(req).unwrap();
        assert_eq!(order.slippage, dec!(0.01));
    }
}

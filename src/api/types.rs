use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Intake Types
// ============================================================================

/// POST /api/orders/execute body. Everything optional so validation can
/// produce precise 400 messages instead of a generic deserialization error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderRequest {
    pub order_type: Option<String>,
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub amount_in: Option<Decimal>,
    pub slippage: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOrderResponse {
    pub order_id: Uuid,
    pub message: String,
    pub websocket_url: String,
    pub instructions: String,
}

// ============================================================================
// Health Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub queue: QueueHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub active_connections: usize,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Dex;

/// A single backend's answer for a swap. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub dex: Dex,
    pub price: Decimal,
    pub amount_out: Decimal,
    pub fee: Decimal,
    pub estimated_gas: Decimal,
}

/// Outcome of comparing the competing quotes. `reason` is the
/// human-readable transparency trace recording both outputs and the delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub selected_dex: Dex,
    pub quote: Quote,
    pub reason: String,
}

/// Result of a (mock) swap execution on the selected backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub tx_hash: String,
    pub executed_price: Decimal,
    pub amount_out: Decimal,
}

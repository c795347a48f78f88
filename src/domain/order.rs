use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order type. Only market orders are executable today; the remaining
/// variants are reserved slots and are rejected at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Sniper,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Sniper => "sniper",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderType {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "sniper" => Ok(OrderType::Sniper),
            _ => Err(format!("Unknown order type: {}", s)),
        }
    }
}

/// DEX backend used for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dex {
    Raydium,
    Meteora,
}

impl Dex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dex::Raydium => "raydium",
            Dex::Meteora => "meteora",
        }
    }
}

impl fmt::Display for Dex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Dex {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "raydium" => Ok(Dex::Raydium),
            "meteora" => Ok(Dex::Meteora),
            _ => Err(format!("Unknown dex: {}", s)),
        }
    }
}

/// Order lifecycle states. Strictly linear; `failed` is reachable from any
/// non-terminal state on the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted at intake, waiting for a worker
    Pending,
    /// Worker is fetching quotes and choosing a backend
    Routing,
    /// Backend chosen, assembling the transaction
    Building,
    /// Transaction handed to the backend
    Submitted,
    /// Swap executed, fill recorded
    Confirmed,
    /// Terminal failure after the final attempt
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Routing => "routing",
            OrderStatus::Building => "building",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }

    /// Is a worker actively driving the order right now?
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OrderStatus::Routing | OrderStatus::Building | OrderStatus::Submitted
        )
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            (Pending, Routing) => true,
            (Routing, Building) => true,
            (Building, Submitted) => true,
            (Submitted, Confirmed) => true,

            // Retries restart the machine at routing from whatever
            // intermediate state the last attempt reached.
            (Routing, Routing) => true,
            (Building, Routing) => true,
            (Submitted, Routing) => true,

            // Terminal failure from any non-terminal state.
            (from, Failed) => !from.is_terminal(),

            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "routing" => Ok(OrderStatus::Routing),
            "building" => Ok(OrderStatus::Building),
            "submitted" => Ok(OrderStatus::Submitted),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "failed" => Ok(OrderStatus::Failed),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Canonical order record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: Uuid,
    pub order_type: OrderType,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub slippage: Decimal,
    pub status: OrderStatus,
    pub dex_used: Option<Dex>,
    pub executed_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_SLIPPAGE: Decimal = dec!(0.01);

impl Order {
    pub fn new(
        order_type: OrderType,
        token_in: String,
        token_out: String,
        amount_in: Decimal,
        slippage: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            order_type,
            token_in,
            token_out,
            amount_in,
            slippage: slippage.unwrap_or(DEFAULT_SLIPPAGE),
            status: OrderStatus::Pending,
            dex_used: None,
            executed_price: None,
            amount_out: None,
            tx_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to an order row. Unset fields are untouched;
/// `updated_at` is refreshed on every apply.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub dex_used: Option<Dex>,
    pub executed_price: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_dex_used(mut self, dex: Dex) -> Self {
        self.dex_used = Some(dex);
        self
    }

    pub fn with_fill(mut self, tx_hash: String, executed_price: Decimal, amount_out: Decimal) -> Self {
        self.tx_hash = Some(tx_hash);
        self.executed_price = Some(executed_price);
        self.amount_out = Some(amount_out);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// In-memory application, mirroring the SQL COALESCE update.
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(dex) = self.dex_used {
            order.dex_used = Some(dex);
        }
        if let Some(price) = self.executed_price {
            order.executed_price = Some(price);
        }
        if let Some(out) = self.amount_out {
            order.amount_out = Some(out);
        }
        if let Some(ref tx) = self.tx_hash {
            order.tx_hash = Some(tx.clone());
        }
        if let Some(ref err) = self.error {
            order.error = Some(err.clone());
        }
        order.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_transitions() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Routing));
        assert!(Routing.can_transition_to(Building));
        assert!(Building.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));

        // No skipping, no going back
        assert!(!Pending.can_transition_to(Building));
        assert!(!Routing.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Routing));
        assert!(!Building.can_transition_to(Pending));
    }

    #[test]
    fn test_retry_restarts_at_routing() {
        use OrderStatus::*;

        assert!(Routing.can_transition_to(Routing));
        assert!(Building.can_transition_to(Routing));
        assert!(Submitted.can_transition_to(Routing));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_failed_only_from_non_terminal() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Failed));
        assert!(Routing.can_transition_to(Failed));
        assert!(Submitted.can_transition_to(Failed));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Routing,
            OrderStatus::Building,
            OrderStatus::Submitted,
            OrderStatus::Confirmed,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::try_from("cancelled").is_err());
    }

    #[test]
    fn test_patch_apply() {
        let mut order = Order::new(
            OrderType::Market,
            "SOL".to_string(),
            "USDC".to_string(),
            rust_decimal_macros::dec!(1),
            None,
        );
        let before = order.updated_at;

        OrderPatch::status(OrderStatus::Building)
            .with_dex_used(Dex::Meteora)
            .apply(&mut order);

        assert_eq!(order.status, OrderStatus::Building);
        assert_eq!(order.dex_used, Some(Dex::Meteora));
        assert!(order.updated_at >= before);
        // Untouched fields stay untouched
        assert!(order.tx_hash.is_none());
        assert!(order.error.is_none());
    }

    #[test]
    fn test_default_slippage() {
        let order = Order::new(
            OrderType::Market,
            "SOL".to_string(),
            "USDC".to_string(),
            rust_decimal_macros::dec!(2.5),
            None,
        );
        assert_eq!(order.slippage, rust_decimal_macros::dec!(0.01));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.created_at <= order.updated_at);
    }
}

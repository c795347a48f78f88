mod order;
mod route;

pub use order::{Dex, Order, OrderPatch, OrderStatus, OrderType};
pub use route::{Quote, RouteResult, SwapReceipt};

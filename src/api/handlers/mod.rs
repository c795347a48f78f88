mod orders;

pub use orders::{execute_order, get_order, health};

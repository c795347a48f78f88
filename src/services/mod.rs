pub mod registry;
pub mod worker;

pub use registry::{ConnectionRegistry, StreamFrame};
pub use worker::{WorkerPool, WorkerSettings};

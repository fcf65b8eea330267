//! Worker pool: request execution and health

pub mod health;
pub mod manager;
pub mod status;
pub mod worker;

pub use manager::{compute_max_workers, WorkerManager};
pub use status::{derive_status, WorkerTracker};
pub use worker::Worker;

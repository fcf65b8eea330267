//! Credit-drop scheduling
//!
//! The timing manager turns the user's traffic specification into a
//! precisely timed sequence of credit drops across the worker pool,
//! phased as warmup then profiling, with at-most-once credit semantics.

pub mod cancellation;
pub mod concurrency;
pub mod fixed_schedule;
pub mod manager;
pub mod phase;
pub mod request_rate;
pub mod strategy;

pub use cancellation::RequestCancellationStrategy;
pub use manager::TimingManager;
pub use phase::{phase_plan, CreditPhaseStats, PhaseConfig};
pub use strategy::{build_strategy, PhaseDriver, TimingError, TimingStrategy};

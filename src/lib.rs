//! # AIPerf - LLM Endpoint Benchmark Engine
//!
//! AIPerf is a distributed load generator and telemetry collector for
//! LLM-serving HTTP endpoints (chat, completions, embeddings, rankings,
//! with SSE streaming). The core is a credit-driven pipeline: a timing
//! manager turns the traffic specification into precisely timed credit
//! drops across a worker pool, workers execute requests with
//! per-response wall-clock capture, and a records manager parses and
//! aggregates the raw records into metric summaries with bounded
//! memory.
//!
//! The services communicate over a typed in-process message bus with
//! four channels: a pub/sub event bus, a targeted request/reply command
//! bus, and two load-balanced work queues (credits and raw records).
//! Execution is phased (warmup then profiling) with at-most-once credit
//! semantics and deterministic shutdown.

pub mod bus;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod domain_types;
pub mod endpoints;
pub mod error;
pub mod export;
pub mod messages;
pub mod records;
pub mod rng;
pub mod service;
pub mod timing;
pub mod transport;
pub mod workers;

pub use config::{ServiceConfig, UserConfig};
pub use controller::SystemController;
pub use error::{AiperfError, ErrorDetails};
pub use messages::ProfileResults;

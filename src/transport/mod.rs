//! HTTP and SSE transport

pub mod http;
pub mod sse;

pub use http::{HttpExchange, HttpTransport, HttpTransportConfig, TransportError};
pub use sse::{SseField, SseMessage, SseParser};

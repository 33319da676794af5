//! # boltd-server
//!
//! Bolt endpoint for boltd.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - The Bolt handshake and chunked message loop
//! - Message dispatch to an injected request handler
//! - An outbound queue with vectored writes and cross-thread backpressure
//! - Prometheus metrics

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;

pub use config::{Config, MetricsConfig, NetworkConfig};
pub use connection::{BoltConnection, ConnectionHandle, Exchange};
pub use error::ServerError;
pub use handler::{NullSession, RequestHandler, ServerInfo};
pub use metrics::Metrics;
pub use server::{Server, ServerConfig, ServerStats};

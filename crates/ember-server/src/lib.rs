//! # ember-server
//!
//! Axum `WebSocket` relay for particle effects.
//!
//! - `WebSocket` endpoint at `/ws` (and `/`): one session task per client
//! - Single-owner dispatcher holding the connection roster and message counter
//! - `fire_tornado` renders answered to the requester and announced to peers
//! - `/health` and Prometheus `/metrics`
//! - Layered configuration (defaults, JSON file, environment)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{load_config, ServerConfig};
pub use errors::ServerError;
pub use server::{RelayHandle, RelayServer};
pub use websocket::dispatch::RelayStats;

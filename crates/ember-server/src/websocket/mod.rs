//! WebSocket sessions, the connection roster and the relay dispatcher.

pub mod connection;
pub mod dispatch;
pub mod roster;
pub mod session;

//! WebSocket transport, wire protocol and per-connection sessions

pub mod clients;
pub mod handler;
pub mod protocol;
pub mod session;

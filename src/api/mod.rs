//! HTTP API: the axum handlers `server.rs` wires into a `Router`.

#![cfg(feature = "cli")]

pub mod admin_api;
pub mod chat_api;
pub mod memory_api;
pub mod sessions_api;

//! `Lockbox` agent.
//!
//! Wires the core config service to real collaborators: an HTTP
//! [`ConfigApi`](lockbox_core::api::ConfigApi), a storage backend chosen by
//! configuration, and structured logging. The `lockbox-agent` binary builds
//! on this to watch or query the server configuration from a terminal.

pub mod api;
pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;

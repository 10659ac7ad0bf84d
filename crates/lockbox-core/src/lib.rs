//! Core library for `Lockbox` clients.
//!
//! Owns the server-configuration model and the [`ConfigService`] that keeps
//! a locally cached copy of it in sync with the server. The service is a
//! small state machine: timer ticks, environment changes, and manual
//! triggers feed a single refresh queue; each fetched configuration is
//! persisted (only while a user session exists) and then broadcast to every
//! subscriber.
//!
//! Storage, the remote API, and authentication status are collaborators
//! behind traits ([`ConfigStateStore`], [`ConfigApi`],
//! [`AuthStatusProvider`]) so hosts can plug in their own.
//!
//! [`ConfigService`]: service::ConfigService
//! [`ConfigStateStore`]: state::ConfigStateStore
//! [`ConfigApi`]: api::ConfigApi
//! [`AuthStatusProvider`]: auth::AuthStatusProvider

pub mod api;
pub mod auth;
pub mod cache;
pub mod environment;
pub mod error;
pub mod model;
pub mod service;
pub mod state;

//! Library crate for traitor-back, exposing modules for binaries and integration tests.

/// Runtime configuration.
pub mod config;
/// Persistence layer.
pub mod dao;
/// Request and response payloads.
pub mod dto;
/// Service and HTTP errors.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Session engine and supporting services.
pub mod services;
/// Shared application state.
pub mod state;

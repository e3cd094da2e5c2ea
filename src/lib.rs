//! Fail-open cache front for axum services.
//!
//! The cache store is an accelerator, never a dependency: see [`cache`] for
//! the client, counters, rate limiter, and response-cache middleware.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

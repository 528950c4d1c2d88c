//! HTTP API served by the daemon.
//!
//! The dashboard views read everything through this API: polled pool data,
//! endpoint latency and selection, and an on-demand latency probe.

pub mod commands;
mod server;
mod v0;

pub use server::{SharedState, router, serve};

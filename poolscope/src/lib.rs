//! Dashboard backend for a stratum mining pool.
//!
//! The pool server itself runs elsewhere; this crate polls its REST API,
//! measures connection latency to the stratum ports it advertises, picks
//! which endpoint a miner should point at, and serves the result as a JSON
//! API for dashboard views.

pub mod api;
pub mod api_client;
pub mod config;
pub mod dashboard;
pub mod endpoint;
pub mod error;
pub mod pool_api;
pub mod probe;
pub mod tracing;

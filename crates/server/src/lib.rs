//! ezkonnect HTTP server
//!
//! Exposes the instrumentation state of the cluster and the annotate
//! endpoints that toggle traces and logs instrumentation on workloads.

pub mod api;
pub mod config;
pub mod error;

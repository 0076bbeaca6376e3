//! CLI command implementations

pub mod annotate;
pub mod state;

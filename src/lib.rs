//! termforge: column-wise content generation with quality review
//!
//! Runs a large term corpus through generate → evaluate → improve, one column
//! at a time, in rate-limited batches. Jobs can be paused, resumed and
//! inspected while they run, and every provider response is cached so a
//! re-run of the same column costs nothing.

pub mod cache;
pub mod cli;
pub mod column;
pub mod config;
pub mod content;
pub mod error;
pub mod job;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod store;

//! Lodestar Core - shared foundation for the task engine
//!
//! This crate provides the error taxonomy, pipeline configuration, run
//! context and small utilities (duration formatting, cache lifetimes,
//! exit codes, tracing setup) used by the graph, resolver and scheduler
//! crates.

pub mod config;
pub mod context;
pub mod error;
pub mod exit_codes;
pub mod lifetime;
pub mod logging;
pub mod time;

pub use config::{CacheConfig, HashOptimization, HasherConfig, PipelineConfig};
pub use context::RunContext;
pub use error::{ConfigError, LodestarError, Result};
pub use lifetime::parse_lifetime;
pub use time::format_duration;

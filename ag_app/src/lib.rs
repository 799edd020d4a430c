//! # ag_app
//!
//! Process wiring around the admission gate: logging, config loading,
//! shutdown signalling and the demo submission workload

pub mod cli;
pub mod config_loader;
pub mod shutdown_handler;
pub mod tracing_setup;
pub mod workload;

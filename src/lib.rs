//! tun-harness - end-to-end verification harness for the tunneld daemon
//!
//! Brings the daemon under test to a running state, runs a DNS-level
//! selftest through it, collects routing/firewall/capture evidence when
//! the selftest fails, and always tears the daemon down before exiting.

pub mod collect;
pub mod commands;
pub mod common;
pub mod config;
pub mod diag;
pub mod harness;
pub mod probe;
pub mod supervisor;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use config::RunConfig;
pub use probe::{probe, ProbeResult};

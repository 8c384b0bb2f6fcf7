//! Reverse SSH tunnel from this machine to the bastion.
//!
//! The transport is the system `ssh` client; this module only builds its
//! command line and restarts it with backoff until shut down.

pub mod config;
pub mod runner;

pub use config::{ReconnectPolicy, TunnelConfig};
pub use runner::{TunnelError, run_tunnel};

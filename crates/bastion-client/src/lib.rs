//! Bastion Client Library
//!
//! Machine-side agent: registers this machine with the registry server,
//! keeps a reverse SSH tunnel to the bastion open, and reports liveness.

pub mod api;
pub mod authorized_keys;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod tunnel;

pub use error::{ClientError, Result};

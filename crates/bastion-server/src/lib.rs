//! Bastion Registry Server Library
//!
//! Core functionality for the Bastion registry:
//! - SQLite machine store with lowest-free-port allocation
//! - Routing config, key file and `authorized_keys` generation
//! - Change propagation to the routing daemon
//! - REST API for registration, listing, rename, delete and heartbeat

pub mod allocator;
pub mod api;
pub mod error;
pub mod registry;
pub mod routing;
pub mod storage;
pub mod supervisor;

pub use allocator::PortPool;
pub use error::{RegistryError, Result};
pub use registry::{Committed, DerivedState, Registry, ReloadHook};

//! Routing config generation.
//!
//! Derives the routing daemon's pipe document, the per-machine key files
//! and the merged `authorized_keys` credential file from the machine list.
//! These files are a cache of the store: they are rewritten in full on
//! every relevant mutation and at startup.

pub mod files;
pub mod render;

pub use files::{RoutingError, RoutingFiles, DEFAULT_AUTHORIZED_KEYS};
pub use render::{key_file_path, render_authorized_keys, render_routing_config};

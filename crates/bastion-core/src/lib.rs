//! Bastion Core Library
//!
//! Shared functionality for Bastion components:
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Tracing/logging initialisation
//! - Validation rules for machine names and SSH public keys

pub mod db;
pub mod tracing_init;
pub mod validate;

pub use validate::ValidationError;

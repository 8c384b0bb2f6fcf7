//! `SQLite` storage for the Bastion registry.
//!
//! One table, `machines`, keyed by unique name and unique port.

mod db;
mod models;
mod queries;


pub use db::{DatabaseError, RegistryDatabase};
pub use models::*;

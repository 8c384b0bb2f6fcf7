//! Database connection and initialization.

pub use bastion_core::db::DatabaseError;

bastion_core::define_database!(RegistryDatabase, "Registry database migrations complete");

//! Database queries for the Bastion registry.

use bastion_core::db::{begin_immediate, unix_timestamp};

use super::db::RegistryDatabase;
use super::models::{Machine, NewMachine};
use crate::allocator::PortPool;
use crate::error::{RegistryError, Result};

/// Whether `e` is the unique constraint on `machines.name`.
///
/// A collision on any other unique column is a storage fault, not a
/// client conflict.
pub(super) fn is_name_conflict(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.message().contains("machines.name")
    })
}

impl RegistryDatabase {
    /// Register a machine, assigning it the lowest free port in `ports`.
    ///
    /// The name check, port scan and insert run in one transaction that
    /// holds the write lock throughout, so a failure leaves neither a
    /// record nor a consumed port behind and concurrent writers wait.
    pub async fn create_machine(&self, new: &NewMachine, ports: PortPool) -> Result<Machine> {
        let mut tx = begin_immediate(self.pool()).await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM machines WHERE name = ?")
            .bind(new.name())
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(RegistryError::NameConflict(new.name().to_string()));
        }

        let used: Vec<u16> = sqlx::query_scalar("SELECT port FROM machines ORDER BY port")
            .fetch_all(&mut *tx)
            .await?;
        let port = ports.allocate(used)?;

        let machine = sqlx::query_as::<_, Machine>(
            "INSERT INTO machines (name, owner, port, local_user, public_key, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(new.name())
        .bind(new.owner())
        .bind(port)
        .bind(new.local_user())
        .bind(new.public_key())
        .bind(unix_timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_name_conflict(&e) {
                RegistryError::NameConflict(new.name().to_string())
            } else {
                RegistryError::from(e)
            }
        })?;

        tx.commit().await?;
        Ok(machine)
    }

    /// Get a machine by name. Absence is `Ok(None)`.
    pub async fn get_machine(&self, name: &str) -> Result<Option<Machine>> {
        let machine = sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(machine)
    }

    /// List all machines, lowest port first.
    pub async fn list_machines(&self) -> Result<Vec<Machine>> {
        let machines = sqlx::query_as::<_, Machine>("SELECT * FROM machines ORDER BY port ASC")
            .fetch_all(self.pool())
            .await?;
        Ok(machines)
    }

    /// Count registered machines.
    pub async fn count_machines(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM machines")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Rename a machine. Port, owner, key and timestamps are untouched.
    pub async fn rename_machine(&self, old_name: &str, new_name: &str) -> Result<Machine> {
        sqlx::query_as::<_, Machine>("UPDATE machines SET name = ? WHERE name = ? RETURNING *")
            .bind(new_name)
            .bind(old_name)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| {
                if is_name_conflict(&e) {
                    RegistryError::NameConflict(new_name.to_string())
                } else {
                    RegistryError::from(e)
                }
            })?
            .ok_or_else(|| RegistryError::NotFound(old_name.to_string()))
    }

    /// Remove a machine and return the deleted record. Its port becomes free.
    pub async fn remove_machine(&self, name: &str) -> Result<Machine> {
        sqlx::query_as::<_, Machine>("DELETE FROM machines WHERE name = ? RETURNING *")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Update a machine's `last_seen` timestamp to now.
    ///
    /// The stored value never moves backwards, even if the clock does.
    pub async fn touch_machine(&self, name: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE machines SET last_seen = MAX(COALESCE(last_seen, 0), ?) WHERE name = ?",
        )
        .bind(unix_timestamp())
        .bind(name)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

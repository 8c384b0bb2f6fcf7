//! Machine registry: store mutations plus change propagation.
//!
//! Every mutation that changes routing runs under one write lock:
//! commit to the store, then re-list machines, rewrite the routing
//! document and the credential file, and fire the reload hook. Failures
//! after the commit are reported as [`DerivedState::Stale`] and never
//! undo the mutation; the next successful mutation or a restart brings
//! the files back in sync.

mod reload;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

pub use reload::{NoDaemon, ReloadHook};

use crate::allocator::PortPool;
use crate::error::Result;
use crate::routing::RoutingFiles;
use crate::storage::{Machine, NewMachine, RegistryDatabase};
use bastion_core::validate::validate_identifier;

/// Whether the derived routing artifacts reflect the committed store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedState {
    Fresh,
    /// The mutation committed but these artifact steps failed.
    Stale(Vec<String>),
}

impl DerivedState {
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    fn from_failures(failures: Vec<String>) -> Self {
        if failures.is_empty() {
            Self::Fresh
        } else {
            Self::Stale(failures)
        }
    }
}

/// A committed mutation together with the state of derived artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub value: T,
    pub derived: DerivedState,
}

/// Registry facade shared by every request handler.
pub struct Registry {
    db: RegistryDatabase,
    ports: PortPool,
    files: RoutingFiles,
    reload: Arc<dyn ReloadHook>,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(
        db: RegistryDatabase,
        ports: PortPool,
        files: RoutingFiles,
        reload: Arc<dyn ReloadHook>,
    ) -> Self {
        Self {
            db,
            ports,
            files,
            reload,
            write_lock: Mutex::new(()),
        }
    }

    pub const fn ports(&self) -> PortPool {
        self.ports
    }

    pub const fn files(&self) -> &RoutingFiles {
        &self.files
    }

    /// The server's public key, if readable.
    pub fn server_public_key(&self) -> Option<String> {
        match self.files.server_public_key() {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Server public key unavailable");
                None
            }
        }
    }

    /// Validate and register a new machine.
    #[instrument(skip(self, owner, local_user, public_key))]
    pub async fn register(
        &self,
        name: &str,
        owner: &str,
        local_user: &str,
        public_key: &str,
    ) -> Result<Committed<Machine>> {
        let new = NewMachine::validate(name, owner, local_user, public_key)?;

        let _guard = self.write_lock.lock().await;
        let machine = self.db.create_machine(&new, self.ports).await?;
        info!(
            name = %machine.name,
            port = machine.port,
            owner = %machine.owner,
            "Machine registered"
        );

        let mut failures = Vec::new();
        if let Err(e) = self.files.write_key(&machine.name, &machine.public_key) {
            warn!(error = %e, name = %machine.name, "Failed to write machine key file");
            failures.push(e.to_string());
        }
        failures.extend(self.propagate().await);

        Ok(Committed {
            value: machine,
            derived: DerivedState::from_failures(failures),
        })
    }

    /// Look up a machine by name.
    pub async fn get(&self, name: &str) -> Result<Option<Machine>> {
        self.db.get_machine(name).await
    }

    /// All machines, lowest port first.
    pub async fn list(&self) -> Result<Vec<Machine>> {
        self.db.list_machines().await
    }

    pub async fn count(&self) -> Result<i64> {
        self.db.count_machines().await
    }

    /// Rename a machine. Both names must satisfy the identifier rule.
    ///
    /// Routing rules and key files are keyed by name, so a rename moves
    /// the key file and regenerates like create and delete do.
    #[instrument(skip(self))]
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<Committed<Machine>> {
        validate_identifier("machine name", old_name)?;
        validate_identifier("new_name", new_name)?;

        let _guard = self.write_lock.lock().await;
        let machine = self.db.rename_machine(old_name, new_name).await?;
        info!(old = %old_name, new = %new_name, port = machine.port, "Machine renamed");

        let mut failures = Vec::new();
        if let Err(e) = self.files.write_key(&machine.name, &machine.public_key) {
            warn!(error = %e, name = %machine.name, "Failed to write machine key file");
            failures.push(e.to_string());
        }
        if old_name != machine.name {
            if let Err(e) = self.files.remove_key(old_name) {
                warn!(error = %e, name = %old_name, "Failed to remove old key file");
                failures.push(e.to_string());
            }
        }
        failures.extend(self.propagate().await);

        Ok(Committed {
            value: machine,
            derived: DerivedState::from_failures(failures),
        })
    }

    /// Delete a machine, freeing its port. Deleting an unknown name fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<Committed<Machine>> {
        let _guard = self.write_lock.lock().await;
        let machine = self.db.remove_machine(name).await?;
        info!(name = %machine.name, port = machine.port, "Machine deleted");

        let mut failures = Vec::new();
        if let Err(e) = self.files.remove_key(&machine.name) {
            warn!(error = %e, name = %machine.name, "Failed to remove machine key file");
            failures.push(e.to_string());
        }
        failures.extend(self.propagate().await);

        Ok(Committed {
            value: machine,
            derived: DerivedState::from_failures(failures),
        })
    }

    /// Record a liveness ping. Does not touch routing artifacts.
    pub async fn heartbeat(&self, name: &str) -> Result<()> {
        self.db.touch_machine(name).await
    }

    /// Rewrite every artifact from the store: all key files, the routing
    /// document and the credential file. Used at startup.
    pub async fn regenerate_all(&self) -> DerivedState {
        let _guard = self.write_lock.lock().await;

        let mut failures = Vec::new();
        match self.db.list_machines().await {
            Ok(machines) => {
                for m in &machines {
                    if let Err(e) = self.files.write_key(&m.name, &m.public_key) {
                        warn!(error = %e, name = %m.name, "Failed to write machine key file");
                        failures.push(e.to_string());
                    }
                }
                info!(machines = machines.len(), "Regenerating routing artifacts");
            }
            Err(e) => {
                warn!(error = %e, "Failed to list machines for key files");
                failures.push(e.to_string());
            }
        }
        failures.extend(self.propagate().await);
        DerivedState::from_failures(failures)
    }

    /// Re-list, rewrite the routing document and credential file, then
    /// notify the routing daemon. Returns the failures; never errors.
    async fn propagate(&self) -> Vec<String> {
        let mut failures = Vec::new();

        let machines = match self.db.list_machines().await {
            Ok(machines) => machines,
            Err(e) => {
                warn!(error = %e, "Failed to list machines for regeneration");
                failures.push(e.to_string());
                return failures;
            }
        };

        // Each artifact is written independently: a failed routing config
        // must not leave a removed machine's key authorized.
        if let Err(e) = self.files.write_routing_config(&machines) {
            warn!(error = %e, "Failed to write routing config");
            failures.push(e.to_string());
        }

        let server_key = self.server_public_key();
        if server_key.is_none() {
            failures.push("server public key unavailable".to_string());
        }
        if let Err(e) = self
            .files
            .write_authorized_keys(server_key.as_deref(), &machines)
        {
            warn!(error = %e, "Failed to update authorized_keys");
            failures.push(e.to_string());
        }

        self.reload.reload();
        failures
    }
}

#[cfg(test)]
mod tests;

//! Reload notification for the routing daemon.

use tracing::debug;

/// Fire-and-forget notification that the routing artifacts changed.
///
/// Implementations must return promptly; any daemon restart happens
/// elsewhere.
pub trait ReloadHook: Send + Sync {
    fn reload(&self);
}

impl<F> ReloadHook for F
where
    F: Fn() + Send + Sync,
{
    fn reload(&self) {
        self();
    }
}

/// Hook used when no routing daemon is supervised by this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDaemon;

impl ReloadHook for NoDaemon {
    fn reload(&self) {
        debug!("Routing artifacts changed; no routing daemon to reload");
    }
}

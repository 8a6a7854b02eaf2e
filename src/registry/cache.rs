//! Process-wide cached registry session
//!
//! At most one live session per source. Creation is single-flight: the slot
//! lock is never held across an await, and concurrent acquirers serialize on
//! an async creation lock and re-check the slot before connecting.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{RegistryAuth, RegistryConnector, RegistryError, RegistrySession};

#[derive(Default)]
struct Slot {
    session: Option<Arc<dyn RegistrySession>>,
    leases: usize,
    /// Bumped whenever the session is replaced or dropped
    generation: u64,
}

/// A counted claim on the cached session
#[derive(Clone)]
pub struct CachedLease {
    session: Arc<dyn RegistrySession>,
    generation: u64,
}

impl CachedLease {
    pub fn session(&self) -> &Arc<dyn RegistrySession> {
        &self.session
    }
}

/// Lazily created, shared session with one hub
pub struct CachedRegistry {
    name: String,
    connector: Arc<dyn RegistryConnector>,
    auth: RegistryAuth,
    close_when_idle: bool,
    slot: Mutex<Slot>,
    create_lock: tokio::sync::Mutex<()>,
}

impl CachedRegistry {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn RegistryConnector>,
        auth: RegistryAuth,
        close_when_idle: bool,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            auth,
            close_when_idle,
            slot: Mutex::new(Slot::default()),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lease(&self) -> Option<CachedLease> {
        let mut slot = self.lock_slot();
        let session = slot.session.clone()?;
        slot.leases += 1;
        Some(CachedLease {
            session,
            generation: slot.generation,
        })
    }

    /// Lease the cached session, connecting if there is none
    pub async fn acquire(&self) -> Result<CachedLease, RegistryError> {
        if let Some(lease) = self.try_lease() {
            return Ok(lease);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(lease) = self.try_lease() {
            return Ok(lease);
        }

        let session = self.connector.connect(&self.auth).await?;
        info!(registry = %self.name, "Cached registry session created");

        let mut slot = self.lock_slot();
        slot.generation += 1;
        slot.session = Some(Arc::clone(&session));
        slot.leases = 1;
        Ok(CachedLease {
            session,
            generation: slot.generation,
        })
    }

    /// Return a lease; the last one closes the session when `close_when_idle` is set
    pub async fn release(&self, lease: CachedLease) {
        let to_close = {
            let mut slot = self.lock_slot();
            if slot.generation != lease.generation {
                None
            } else {
                slot.leases = slot.leases.saturating_sub(1);
                if slot.leases == 0 && self.close_when_idle {
                    slot.generation += 1;
                    slot.session.take()
                } else {
                    None
                }
            }
        };

        if let Some(session) = to_close {
            debug!(registry = %self.name, "Closing idle cached registry session");
            session.close().await;
        }
    }

    /// Drop the session a lease belongs to after it failed
    pub async fn invalidate(&self, lease: CachedLease) {
        let to_close = {
            let mut slot = self.lock_slot();
            if slot.generation == lease.generation {
                slot.generation += 1;
                slot.leases = 0;
                slot.session.take()
            } else {
                None
            }
        };

        if let Some(session) = to_close {
            warn!(registry = %self.name, "Invalidating cached registry session");
            session.close().await;
        }
    }

    /// Close and clear the session regardless of outstanding leases
    pub async fn reset(&self) {
        let to_close = {
            let mut slot = self.lock_slot();
            slot.generation += 1;
            slot.leases = 0;
            slot.session.take()
        };

        if let Some(session) = to_close {
            info!(registry = %self.name, "Resetting cached registry session");
            session.close().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock_slot().session.is_some()
    }

    pub fn lease_count(&self) -> usize {
        self.lock_slot().leases
    }
}

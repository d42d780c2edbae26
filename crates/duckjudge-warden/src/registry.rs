//! Port to container bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEntry {
    /// Claimed while the container is being created.
    Starting,
    Running(String),
}

#[derive(Debug)]
struct Slot {
    claim: u64,
    entry: PortEntry,
}

/// Owns the mapping of host ports to containers. A port is claimed before
/// its container exists so two concurrent creations can never share it.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: Mutex<HashMap<u16, Slot>>,
    claims: AtomicU64,
}

/// A port held in the `Starting` state. Dropping the claim without
/// binding it frees the port again.
#[derive(Debug)]
pub struct PortClaim {
    registry: Arc<PortRegistry>,
    port: u16,
    claim: u64,
    settled: bool,
}

impl PortClaim {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Records the container of the claimed port. Fails with `UnknownPort`
    /// when the port was released while the container was starting.
    pub fn bind(mut self, container_id: impl Into<String>) -> Result<()> {
        self.settled = true;
        let mut ports = self.registry.lock();
        match ports.get_mut(&self.port) {
            Some(slot) if slot.claim == self.claim && slot.entry == PortEntry::Starting => {
                slot.entry = PortEntry::Running(container_id.into());
                Ok(())
            }
            _ => Err(WardenError::UnknownPort(self.port)),
        }
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut ports = self.registry.lock();
        let ours = matches!(
            ports.get(&self.port),
            Some(slot) if slot.claim == self.claim && slot.entry == PortEntry::Starting
        );
        if ours {
            ports.remove(&self.port);
            log::debug!("claim on port {} abandoned", self.port);
        }
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(self: &Arc<Self>, port: u16) -> Result<PortClaim> {
        let mut ports = self.lock();
        if ports.contains_key(&port) {
            return Err(WardenError::DuplicatePort(port));
        }
        let claim = self.claims.fetch_add(1, Ordering::Relaxed);
        ports.insert(
            port,
            Slot {
                claim,
                entry: PortEntry::Starting,
            },
        );
        Ok(PortClaim {
            registry: Arc::clone(self),
            port,
            claim,
            settled: false,
        })
    }

    /// Forgets `port`, returning its container if one was running.
    pub fn release(&self, port: u16) -> Result<Option<String>> {
        match self.lock().remove(&port) {
            Some(Slot {
                entry: PortEntry::Running(id),
                ..
            }) => Ok(Some(id)),
            Some(_) => Ok(None),
            None => Err(WardenError::UnknownPort(port)),
        }
    }

    pub fn get(&self, port: u16) -> Option<PortEntry> {
        self.lock().get(&port).map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every running container, for teardown.
    pub fn drain(&self) -> Vec<(u16, String)> {
        self.lock()
            .drain()
            .filter_map(|(port, slot)| match slot.entry {
                PortEntry::Running(id) => Some((port, id)),
                PortEntry::Starting => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Slot>> {
        self.ports.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_claims_are_rejected() {
        let registry = Arc::new(PortRegistry::new());
        let _claim = registry.claim(9000).unwrap();
        assert!(matches!(registry.claim(9000), Err(WardenError::DuplicatePort(9000))));
        assert_eq!(registry.get(9000), Some(PortEntry::Starting));
    }

    #[test]
    fn test_lifecycle() {
        let registry = Arc::new(PortRegistry::new());
        registry.claim(9001).unwrap().bind("abc").unwrap();
        assert_eq!(registry.get(9001), Some(PortEntry::Running("abc".into())));

        assert_eq!(registry.release(9001).unwrap(), Some("abc".to_string()));
        assert!(registry.is_empty());
        assert!(matches!(registry.release(9001), Err(WardenError::UnknownPort(9001))));
        let _claim = registry.claim(9001).unwrap();
    }

    #[test]
    fn test_dropped_claim_frees_the_port() {
        let registry = Arc::new(PortRegistry::new());
        let claim = registry.claim(9002).unwrap();
        assert_eq!(claim.port(), 9002);
        drop(claim);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bind_after_release_fails() {
        let registry = Arc::new(PortRegistry::new());
        let claim = registry.claim(9003).unwrap();
        assert_eq!(registry.release(9003).unwrap(), None);
        assert!(matches!(claim.bind("late"), Err(WardenError::UnknownPort(9003))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_claim_leaves_a_newer_claim_alone() {
        let registry = Arc::new(PortRegistry::new());
        let stale = registry.claim(9004).unwrap();
        registry.release(9004).unwrap();
        let fresh = registry.claim(9004).unwrap();

        assert!(stale.bind("old").is_err());
        assert_eq!(registry.get(9004), Some(PortEntry::Starting));
        fresh.bind("new").unwrap();
        assert_eq!(registry.get(9004), Some(PortEntry::Running("new".into())));
    }
}

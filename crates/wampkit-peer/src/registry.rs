//! Process-wide registration and subscription registry.
//!
//! Several peers in one process share a single [`Registry`] so an INVOCATION
//! or EVENT carrying only a numeric id resolves to exactly one owner and
//! name. Entries are revoked when the owning session ends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Token identifying one peer enrolled in a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One registry entry. With shared registrations several peers can own the
/// same router-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: String,
    pub owners: Vec<PeerId>,
}

#[derive(Debug, Default)]
struct Inner {
    next_peer: u64,
    labels: HashMap<PeerId, String>,
    registrations: HashMap<u64, RegistryEntry>,
    subscriptions: HashMap<u64, RegistryEntry>,
}

/// Shared id → (owner, name) tables behind a single lock.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new registry ready to be handed to several peers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Issue an owner token for a peer.
    pub fn enroll(&self, label: &str) -> PeerId {
        let mut inner = self.inner.lock();
        inner.next_peer += 1;
        let id = PeerId(inner.next_peer);
        inner.labels.insert(id, label.to_string());
        debug!(peer = %label, owner = %id, "peer enrolled in registry");
        id
    }

    /// Record that `owner` holds registration `id` for `procedure`.
    ///
    /// Returns false when the id is already bound to a different procedure.
    pub fn record_registration(&self, owner: PeerId, id: u64, procedure: &str) -> bool {
        let mut inner = self.inner.lock();
        record(&mut inner.registrations, owner, id, procedure, "registration")
    }

    /// Record that `owner` holds subscription `id` for `topic`.
    pub fn record_subscription(&self, owner: PeerId, id: u64, topic: &str) -> bool {
        let mut inner = self.inner.lock();
        record(&mut inner.subscriptions, owner, id, topic, "subscription")
    }

    /// Procedure behind registration `id`, if `owner` holds it.
    pub fn procedure_for(&self, owner: PeerId, id: u64) -> Option<String> {
        let inner = self.inner.lock();
        lookup(&inner.registrations, owner, id)
    }

    /// Topic behind subscription `id`, if `owner` holds it.
    pub fn topic_for(&self, owner: PeerId, id: u64) -> Option<String> {
        let inner = self.inner.lock();
        lookup(&inner.subscriptions, owner, id)
    }

    pub fn registration(&self, id: u64) -> Option<RegistryEntry> {
        self.inner.lock().registrations.get(&id).cloned()
    }

    pub fn subscription(&self, id: u64) -> Option<RegistryEntry> {
        self.inner.lock().subscriptions.get(&id).cloned()
    }

    /// Drop every entry owned by `owner`. Returns how many ids were released.
    pub fn revoke(&self, owner: PeerId) -> usize {
        let mut inner = self.inner.lock();
        let released =
            release(&mut inner.registrations, owner) + release(&mut inner.subscriptions, owner);
        if let Some(label) = inner.labels.remove(&owner) {
            debug!(peer = %label, owner = %owner, released, "registry entries revoked");
        }
        released
    }

    pub fn registration_count(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }
}

fn record(
    table: &mut HashMap<u64, RegistryEntry>,
    owner: PeerId,
    id: u64,
    name: &str,
    kind: &'static str,
) -> bool {
    let entry = table.entry(id).or_insert_with(|| RegistryEntry {
        name: name.to_string(),
        owners: Vec::new(),
    });
    if entry.name != name {
        warn!(
            id,
            kind,
            existing = %entry.name,
            requested = %name,
            "registry id already bound to another name"
        );
        return false;
    }
    if !entry.owners.contains(&owner) {
        entry.owners.push(owner);
    }
    true
}

fn lookup(table: &HashMap<u64, RegistryEntry>, owner: PeerId, id: u64) -> Option<String> {
    table
        .get(&id)
        .filter(|entry| entry.owners.contains(&owner))
        .map(|entry| entry.name.clone())
}

fn release(table: &mut HashMap<u64, RegistryEntry>, owner: PeerId) -> usize {
    let mut released = 0;
    table.retain(|_, entry| {
        let before = entry.owners.len();
        entry.owners.retain(|held| *held != owner);
        released += before - entry.owners.len();
        !entry.owners.is_empty()
    });
    released
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn lookups_are_scoped_to_owner() {
        let registry = Registry::new();
        let a = registry.enroll("a");
        let b = registry.enroll("b");
        assert_ne!(a, b);

        assert!(registry.record_registration(a, 10, "echo"));
        assert_eq!(registry.procedure_for(a, 10).as_deref(), Some("echo"));
        assert_eq!(registry.procedure_for(b, 10), None);
        assert_eq!(registry.procedure_for(a, 11), None);
    }

    #[test]
    fn shared_registration_has_two_owners() {
        let registry = Registry::new();
        let a = registry.enroll("a");
        let b = registry.enroll("b");

        assert!(registry.record_registration(a, 10, "echo"));
        assert!(registry.record_registration(b, 10, "echo"));
        assert!(!registry.record_registration(b, 10, "other"));

        let entry = registry.registration(10).expect("entry");
        assert_eq!(entry.owners, vec![a, b]);
    }

    #[test]
    fn revoke_releases_only_owner_entries() {
        let registry = Registry::new();
        let a = registry.enroll("a");
        let b = registry.enroll("b");

        registry.record_registration(a, 10, "echo");
        registry.record_registration(b, 10, "echo");
        registry.record_registration(a, 20, "add");
        registry.record_subscription(a, 30, "news");

        assert_eq!(registry.revoke(a), 3);
        assert_eq!(registry.registration_count(), 1);
        assert_eq!(registry.subscription_count(), 0);
        assert_eq!(registry.procedure_for(b, 10).as_deref(), Some("echo"));
        assert_eq!(registry.revoke(a), 0);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let registry = Registry::shared();
        let handles: Vec<_> = (0..8u64)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let owner = registry.enroll(&format!("peer{n}"));
                    for i in 0..50u64 {
                        registry.record_registration(owner, n * 1000 + i, "proc");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(registry.registration_count(), 400);
    }
}

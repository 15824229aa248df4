// Owner-scoped companion registry

use crate::simulation::AgentIdentity;
use dashmap::DashMap;
use std::collections::BTreeMap;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Persisted form of a registry: companion name -> durable agent id
pub type CompanionRecord = BTreeMap<String, Uuid>;

/// Maps companion names to the identity of the agent bound to them.
///
/// At most one identity is held per name. Entries are not pruned when their
/// agent disappears from the simulation; callers check liveness on access.
#[derive(Debug, Default)]
pub struct CompanionRegistry {
    /// Lock-free concurrent map (name -> identity)
    bindings: DashMap<String, AgentIdentity>,
}

impl CompanionRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind `name` to `identity`, returning the identity it replaces.
    pub fn bind(&self, name: &str, identity: AgentIdentity) -> Option<AgentIdentity> {
        self.bindings.insert(name.to_string(), identity)
    }

    /// Remove the binding for `name`.
    pub fn unbind(&self, name: &str) -> Option<AgentIdentity> {
        self.bindings.remove(name).map(|(_, identity)| identity)
    }

    pub fn lookup(&self, name: &str) -> Option<AgentIdentity> {
        self.bindings.get(name).map(|entry| *entry.value())
    }

    /// Snapshot of every bound name (no particular order).
    pub fn all_names(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every binding (no particular order).
    pub fn entries(&self) -> Vec<(String, AgentIdentity)> {
        self.bindings
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Convert to the persisted record format.
    ///
    /// Only durable ids survive; entity ids are process-local.
    pub fn to_record(&self) -> CompanionRecord {
        self.bindings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().uuid))
            .collect()
    }

    /// Build a registry from a persisted record.
    ///
    /// Restored identities carry no entity id until they are seen alive.
    pub fn from_record(record: CompanionRecord) -> Self {
        let registry = Self::new();
        registry.load_record(record);
        registry
    }

    /// Merge a persisted record into this registry, overwriting same-named entries.
    pub fn load_record(&self, record: CompanionRecord) {
        for (name, uuid) in record {
            self.bindings.insert(name, AgentIdentity::durable(uuid));
        }
    }
}

//! Identity Map: at most one in-memory instance per row per session.
//!
//! The map is keyed by `(TypeId, key-hash)` so each entity type has its
//! own namespace. It stores the managed representative as a type-erased
//! `Arc`, and lookups hand out clones of that same `Arc`: getting an
//! entity twice yields pointer-equal references.

use entman_core::{CellClone, Error, IdentityCell, Result, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Unique identity of a managed instance within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    type_id: TypeId,
    key_hash: u64,
}

impl ObjectKey {
    /// Build the identity key for an entity type and key value.
    #[must_use]
    pub fn new(type_id: TypeId, key: &Value) -> Self {
        let mut hasher = DefaultHasher::new();
        key.hash_into(&mut hasher);
        Self {
            type_id,
            key_hash: hasher.finish(),
        }
    }

    /// The entity type component.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The hashed key component.
    #[must_use]
    pub fn key_hash(&self) -> u64 {
        self.key_hash
    }
}

struct MapEntry {
    cell: IdentityCell,
    clone_cell: CellClone,
    instance_addr: usize,
}

/// Per-session table of managed representatives.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<ObjectKey, MapEntry>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the stored cell for a key, if present.
    ///
    /// The clone shares the stored allocation, so downcasting yields the
    /// identical instance.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<IdentityCell> {
        let entry = self.entries.get(key)?;
        (entry.clone_cell)(&entry.cell)
    }

    /// Register an instance for a key.
    ///
    /// Fails with `Error::DuplicateKey` if a *different* instance is
    /// already registered for that key; re-putting the same instance is
    /// a no-op. The invariant is never silently repaired by overwriting.
    pub fn put(
        &mut self,
        key: ObjectKey,
        table: &'static str,
        key_value: &Value,
        cell: IdentityCell,
        instance_addr: usize,
        clone_cell: CellClone,
    ) -> Result<()> {
        if let Some(existing) = self.entries.get(&key) {
            if existing.instance_addr == instance_addr {
                return Ok(());
            }
            return Err(Error::DuplicateKey {
                table,
                key: key_value.clone(),
            });
        }
        self.entries.insert(
            key,
            MapEntry {
                cell,
                clone_cell,
                instance_addr,
            },
        );
        Ok(())
    }

    /// Remove an entry.
    ///
    /// Returns `true` if the entry existed.
    pub fn remove(&mut self, key: &ObjectKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Check if a key is registered.
    #[must_use]
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Allocation address of the registered instance, if any.
    #[must_use]
    pub fn instance_addr(&self, key: &ObjectKey) -> Option<usize> {
        self.entries.get(key).map(|e| e.instance_addr)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries (session close).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

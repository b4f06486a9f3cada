//! Lifecycle state tracking and snapshot-based dirty detection.
//!
//! Every managed instance has a tracked state and a snapshot of its
//! column values taken at load/persist time. Dirty checking at flush is
//! an explicit diff of the serialized current row against that snapshot;
//! there is no hidden interception of field writes.

use crate::identity_map::ObjectKey;
use entman_core::{
    AssociationInfo, Error, LifecycleEvent, ManagedState, Result, RowProbe, Value,
};
use std::collections::HashMap;

/// The legal transition table.
///
/// `None` means the event is invalid for the state and must surface as
/// `Error::IllegalStateTransition`.
fn next_state(from: ManagedState, event: LifecycleEvent) -> Option<ManagedState> {
    use LifecycleEvent as E;
    use ManagedState as S;
    match (from, event) {
        (S::Transient, E::Persist | E::Merge) => Some(S::Managed),
        (S::Managed, E::Merge) => Some(S::Managed),
        (S::Managed, E::Remove) => Some(S::Removed),
        (S::Managed | S::Removed, E::Detach) => Some(S::Detached),
        (S::Removed, E::Remove) => Some(S::Removed),
        (S::Detached, E::Merge) => Some(S::Managed),
        _ => None,
    }
}

/// Flush metadata and lifecycle state for one tracked instance.
pub struct TrackedState {
    /// Current lifecycle state.
    pub state: ManagedState,
    /// Storage table.
    pub table: &'static str,
    /// Primary key column.
    pub key_column: &'static str,
    /// Primary key value.
    pub key: Value,
    /// Accessor for the instance's current row values.
    pub probe: RowProbe,
    /// Association metadata (cascade-remove planning).
    pub associations: &'static [AssociationInfo],
    /// Serialized column values at load/persist time.
    pub snapshot: Option<Vec<u8>>,
}

/// Tracks lifecycle states and dirty-check snapshots per identity.
#[derive(Default)]
pub struct StateTracker {
    entries: HashMap<ObjectKey, TrackedState>,
}

impl StateTracker {
    /// Create a new empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an instance.
    pub fn track(&mut self, key: ObjectKey, entry: TrackedState) {
        self.entries.insert(key, entry);
    }

    /// Current state of a tracked identity.
    #[must_use]
    pub fn state_of(&self, key: &ObjectKey) -> Option<ManagedState> {
        self.entries.get(key).map(|e| e.state)
    }

    /// Tracked metadata for an identity.
    #[must_use]
    pub fn entry(&self, key: &ObjectKey) -> Option<&TrackedState> {
        self.entries.get(key)
    }

    /// Apply a lifecycle event to a tracked identity.
    ///
    /// Fails with `Error::IllegalStateTransition` when the event is not
    /// valid for the current state. Untracked identities are not
    /// accepted here; callers decide how untracked instances map onto
    /// `Transient`/`Detached`.
    pub fn transition(&mut self, key: &ObjectKey, event: LifecycleEvent) -> Result<ManagedState> {
        let entry = self.entries.get_mut(key).ok_or(Error::IllegalStateTransition {
            from: ManagedState::Transient,
            event,
        })?;
        match next_state(entry.state, event) {
            Some(next) => {
                tracing::trace!(from = %entry.state, %event, to = %next, "state transition");
                entry.state = next;
                Ok(next)
            }
            None => Err(Error::IllegalStateTransition {
                from: entry.state,
                event,
            }),
        }
    }

    /// Take a snapshot of the given row values as the dirty-check
    /// baseline.
    pub fn snapshot(&mut self, key: &ObjectKey, row: &[(&'static str, Value)]) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.snapshot = serde_json::to_vec(row).ok();
        }
    }

    /// Check whether current row values differ from the snapshot.
    ///
    /// An identity without a snapshot is treated as dirty.
    #[must_use]
    pub fn is_dirty(&self, key: &ObjectKey, current: &[(&'static str, Value)]) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return true;
        };
        let Some(snapshot) = &entry.snapshot else {
            return true;
        };
        serde_json::to_vec(current).map_or(true, |bytes| bytes != *snapshot)
    }

    /// Column names whose values differ from the snapshot.
    ///
    /// Without a snapshot every column counts as changed.
    #[must_use]
    pub fn changed_columns(
        &self,
        key: &ObjectKey,
        current: &[(&'static str, Value)],
    ) -> Vec<&'static str> {
        let Some(snapshot) = self.entries.get(key).and_then(|e| e.snapshot.as_ref()) else {
            return current.iter().map(|(name, _)| *name).collect();
        };
        let original: Vec<(String, Value)> = match serde_json::from_slice(snapshot) {
            Ok(values) => values,
            Err(_) => return current.iter().map(|(name, _)| *name).collect(),
        };

        let mut changed = Vec::new();
        for (name, value) in current {
            let old = original
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v);
            if old != Some(value) {
                changed.push(*name);
            }
        }
        changed
    }

    /// Stop tracking an identity.
    pub fn remove(&mut self, key: &ObjectKey) -> Option<TrackedState> {
        self.entries.remove(key)
    }

    /// Iterate tracked identities.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &TrackedState)> {
        self.entries.iter()
    }

    /// Identities currently scheduled for deletion.
    #[must_use]
    pub fn removed_keys(&self) -> Vec<ObjectKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ManagedState::Removed)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Number of tracked identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all tracking state (session close).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! Entity trait and lifecycle model.
//!
//! The `Entity` trait defines the contract for structs mapped to storage
//! tables. Metadata (table name, key column, associations) is static and
//! supplied by hand-written impls; the session layer drives persistence
//! through it without runtime reflection.

use crate::Result;
use crate::association::AssociationInfo;
use crate::lazy::{AssociationContext, CascadeTarget};
use crate::row::Row;
use crate::schema::ColumnDef;
use crate::value::Value;
use std::fmt;

/// Lifecycle state of an entity instance relative to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedState {
    /// Never associated with a session; no identity yet.
    Transient,
    /// Tracked by exactly one live session's identity map.
    Managed,
    /// Was managed; the session ended or the instance was evicted.
    /// Identity (type + key) is still meaningful but untracked.
    Detached,
    /// Managed but scheduled for deletion. Stays in the identity map
    /// until flush.
    Removed,
}

impl ManagedState {
    /// Lowercase state name for messages.
    pub const fn name(self) -> &'static str {
        match self {
            ManagedState::Transient => "transient",
            ManagedState::Managed => "managed",
            ManagedState::Detached => "detached",
            ManagedState::Removed => "removed",
        }
    }
}

impl fmt::Display for ManagedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `Session::persist`
    Persist,
    /// `Session::remove`
    Remove,
    /// `Session::merge`
    Merge,
    /// Session close or explicit eviction.
    Detach,
}

impl LifecycleEvent {
    /// Lowercase event name for messages.
    pub const fn name(self) -> &'static str {
        match self {
            LifecycleEvent::Persist => "persist",
            LifecycleEvent::Remove => "remove",
            LifecycleEvent::Merge => "merge",
            LifecycleEvent::Detach => "detach",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key generation strategy, selected per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// The storage engine assigns the key at insert time; the runtime
    /// reads it back afterwards.
    Identity,
    /// The key is pre-fetched from a named monotonic counter before the
    /// insert.
    Sequence,
    /// Pick `Identity` when the engine supports it, else `Sequence`.
    #[default]
    Auto,
}

/// Trait for types that can be mapped to storage tables.
///
/// Implementations are hand-written; see the integration tests for the
/// expected shape. Entities with associations additionally override
/// `wire_associations` (proxy/eager setup after a row is materialized),
/// `cascade_targets` (reachable instances for the cascade walk), and
/// `apply_row` (merge support that leaves association state alone).
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    /// The name of the storage table.
    const TABLE_NAME: &'static str;

    /// The primary key column name.
    const KEY_COLUMN: &'static str;

    /// Key generation strategy for this type.
    const KEY_STRATEGY: KeyStrategy = KeyStrategy::Auto;

    /// Association metadata for this type. Types with no associations
    /// rely on the default empty slice.
    const ASSOCIATIONS: &'static [AssociationInfo] = &[];

    /// Column metadata for this type.
    fn columns() -> &'static [ColumnDef];

    /// Convert this instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a storage row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Overwrite column-backed fields from a row, leaving association
    /// state untouched.
    ///
    /// The default replaces the whole value, which is only correct for
    /// types without associations; types with associations must override.
    fn apply_row(&mut self, row: &Row) -> Result<()> {
        *self = Self::from_row(row)?;
        Ok(())
    }

    /// Get the primary key value, if assigned.
    fn key(&self) -> Option<Value>;

    /// Set the primary key value after generation.
    fn set_key(&mut self, key: Value);

    /// Check if this is a new record (no key assigned).
    fn is_new(&self) -> bool {
        self.key().is_none()
    }

    /// Name of the key sequence used by the `Sequence` strategy.
    fn sequence_name() -> String {
        format!("{}_seq", Self::TABLE_NAME)
    }

    /// Bind association fields after this instance was materialized from
    /// a row: lazy fields become proxies tied to the loading session,
    /// eager fields are fetched and populated immediately.
    fn wire_associations(&mut self, _ctx: &mut AssociationContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Associated instances reachable from this one, for the cascade
    /// walk.
    fn cascade_targets(&self) -> Vec<CascadeTarget> {
        Vec::new()
    }
}

/// Object-safe view of an entity, used by the cascade engine to walk a
/// heterogeneous association graph.
///
/// Implemented for every `Entity` via the blanket impl below; never
/// implement it directly.
pub trait EntityNode: Send + Sync {
    /// The storage table name.
    fn table_name(&self) -> &'static str;

    /// The primary key column name.
    fn key_column(&self) -> &'static str;

    /// Key generation strategy.
    fn key_strategy(&self) -> KeyStrategy;

    /// Sequence name for the `Sequence` strategy.
    fn sequence_name(&self) -> String;

    /// Current key value, if assigned.
    fn key_value(&self) -> Option<Value>;

    /// Assign a generated key.
    fn assign_key(&mut self, key: Value);

    /// Current column values.
    fn row_values(&self) -> Vec<(&'static str, Value)>;

    /// Reachable associated instances.
    fn node_cascade_targets(&self) -> Vec<CascadeTarget>;
}

impl<T: Entity> EntityNode for T {
    fn table_name(&self) -> &'static str {
        T::TABLE_NAME
    }

    fn key_column(&self) -> &'static str {
        T::KEY_COLUMN
    }

    fn key_strategy(&self) -> KeyStrategy {
        T::KEY_STRATEGY
    }

    fn sequence_name(&self) -> String {
        T::sequence_name()
    }

    fn key_value(&self) -> Option<Value> {
        self.key()
    }

    fn assign_key(&mut self, key: Value) {
        self.set_key(key);
    }

    fn row_values(&self) -> Vec<(&'static str, Value)> {
        self.to_row()
    }

    fn node_cascade_targets(&self) -> Vec<CascadeTarget> {
        self.cascade_targets()
    }
}

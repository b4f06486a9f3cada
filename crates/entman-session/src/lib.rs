//! Session and unit of work for entman.
//!
//! `entman-session` is the **unit-of-work layer**. It coordinates object
//! identity, lifecycle state, cascading, and transactional persistence
//! over an abstract storage engine.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: a single in-memory instance per (type, key) per
//!   session.
//! - **State tracking**: transient/managed/detached/removed lifecycle
//!   with snapshot-based dirty detection.
//! - **Cascading**: persist-by-reachability over declared associations.
//! - **Transactional safety**: flush/commit/rollback around a
//!   `SqlExecutor`, with a scoped unit-of-work wrapper.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: no autoflush; resolution of lazy
//!   associations is an explicit call.
//! - **Ownership clarity**: the session owns the executor; proxies hold
//!   weak handles into the session core and die with it.
//! - **Type erasure**: the identity map stores `Box<dyn Any>` cells so
//!   heterogeneous entity types share one map.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(executor, catalog);
//!
//! let mut team = Team::new("Avengers");
//! session.persist(&mut team)?;            // INSERT, key assigned, cascades
//!
//! let found = session.find::<Team>(team.id.unwrap())?;  // identity map hit
//!
//! session.flush()?;                        // UPDATEs from snapshot diffs
//! session.close()?;                        // everything becomes detached
//! ```
//!
//! A session and everything it owns is confined to one logical unit of
//! work at a time; run independent sessions for concurrent work.

pub mod cascade;
pub mod flush;
pub mod identity_map;
pub mod query;
pub mod state_tracker;

mod sql;

pub use identity_map::{IdentityMap, ObjectKey};
pub use query::{Query, QueryIter};
pub use state_tracker::{StateTracker, TrackedState};

use cascade::CascadeEngine;
use entman_core::{
    AdmitEntry, AssociationInfo, AssociationSource, Entity, EntityRef, Error, IdentityCell,
    JoinTableInfo, KeyStrategy, LifecycleEvent, ManagedState, Result, Row, SchemaCatalog,
    SourceHandle, SqlExecutor, Value, materialize,
};
use std::any::TypeId;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Shared mutable state of one session.
///
/// Lives behind `Arc<RwLock<...>>` so lazy proxies can reach back into
/// the session that created them via weak handles. The lock is a
/// soundness guard, not a concurrency feature: a session is confined to
/// one logical unit of work at a time.
pub(crate) struct SessionCore {
    pub(crate) executor: Box<dyn SqlExecutor>,
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) identity_map: IdentityMap,
    pub(crate) tracker: StateTracker,
    pub(crate) open: bool,
    pub(crate) in_transaction: bool,
}

impl SessionCore {
    fn registered_descriptor<T: Entity>(
        catalog: &SchemaCatalog,
    ) -> Result<&entman_core::EntityDescriptor> {
        catalog.descriptor_for::<T>().ok_or_else(|| {
            Error::Custom(format!(
                "entity type '{}' is not registered in the schema catalog",
                T::TABLE_NAME
            ))
        })
    }

    /// Resolve `Auto` against the engine's capability.
    pub(crate) fn effective_strategy(&self, declared: KeyStrategy) -> KeyStrategy {
        match declared {
            KeyStrategy::Auto => {
                if self.executor.supports_identity_keys() {
                    KeyStrategy::Identity
                } else {
                    KeyStrategy::Sequence
                }
            }
            other => other,
        }
    }

    fn exec_insert(&mut self, table: &str, row: &[(&'static str, Value)]) -> Result<u64> {
        let columns: Vec<&str> = row.iter().map(|(n, _)| *n).collect();
        let params: Vec<Value> = row.iter().map(|(_, v)| v.clone()).collect();
        let statement = sql::insert_sql(table, &columns);
        Ok(self.executor.execute(&statement, &params)?)
    }

    /// Insert one row, generating its key per the strategy, and return
    /// the key. A row arriving with a non-null key keeps it.
    pub(crate) fn insert_row(
        &mut self,
        table: &'static str,
        key_column: &'static str,
        strategy: KeyStrategy,
        sequence: &str,
        mut row: Vec<(&'static str, Value)>,
    ) -> Result<Value> {
        let preset = row
            .iter()
            .find(|(name, _)| *name == key_column)
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_null());

        let key = if let Some(key) = preset {
            self.exec_insert(table, &row)?;
            key
        } else {
            match self.effective_strategy(strategy) {
                KeyStrategy::Sequence => {
                    let next =
                        self.executor
                            .next_sequence_value(sequence)
                            .map_err(|e| Error::KeyGeneration {
                                table,
                                message: e.to_string(),
                            })?;
                    let key = Value::BigInt(next);
                    set_column(&mut row, key_column, key.clone());
                    self.exec_insert(table, &row)?;
                    key
                }
                KeyStrategy::Identity | KeyStrategy::Auto => {
                    row.retain(|(name, _)| *name != key_column);
                    self.exec_insert(table, &row)?;
                    let id = self.executor.last_insert_id().map_err(|e| Error::KeyGeneration {
                        table,
                        message: e.to_string(),
                    })?;
                    Value::BigInt(id)
                }
            }
        };
        tracing::debug!(table, key = %key, "inserted row");
        Ok(key)
    }

    /// Write one link-table row.
    pub(crate) fn insert_join_row(
        &mut self,
        link: &JoinTableInfo,
        owner_key: &Value,
        target_key: &Value,
    ) -> Result<()> {
        let statement = sql::insert_sql(link.table, &[link.owner_column, link.target_column]);
        self.executor
            .execute(&statement, &[owner_key.clone(), target_key.clone()])?;
        Ok(())
    }

    /// Register a managed representative: identity map entry, tracked
    /// state, and dirty-check snapshot.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register_cell(
        &mut self,
        okey: ObjectKey,
        table: &'static str,
        key_column: &'static str,
        key: Value,
        cell: IdentityCell,
        instance_addr: usize,
        clone_cell: entman_core::CellClone,
        probe: entman_core::RowProbe,
        associations: &'static [AssociationInfo],
        row: Vec<(&'static str, Value)>,
    ) -> Result<()> {
        self.identity_map
            .put(okey, table, &key, cell, instance_addr, clone_cell)?;
        self.tracker.track(
            okey,
            TrackedState {
                state: ManagedState::Managed,
                table,
                key_column,
                key,
                probe,
                associations,
                snapshot: None,
            },
        );
        self.tracker.snapshot(&okey, &row);
        Ok(())
    }

    // ========================================================================
    // Typed operations (invoked under the session lock)
    // ========================================================================

    fn persist_entity<T: Entity>(&mut self, entity: &mut T) -> Result<EntityRef<T>> {
        let catalog = Arc::clone(&self.catalog);
        let strategy = Self::registered_descriptor::<T>(&catalog)?.key_strategy;
        // Writes happen at persist time; open the transaction now.
        self.begin_transaction()?;

        if let Some(key) = entity.key() {
            let okey = ObjectKey::new(TypeId::of::<T>(), &key);
            if let Some(state) = self.tracker.state_of(&okey) {
                return Err(match state {
                    ManagedState::Managed => Error::EntityAlreadyManaged {
                        table: T::TABLE_NAME,
                        key,
                    },
                    other => Error::IllegalStateTransition {
                        from: other,
                        event: LifecycleEvent::Persist,
                    },
                });
            }
        }

        let targets = entity.cascade_targets();
        let mut engine = CascadeEngine::new();
        engine.cascade_before_insert(self, &targets)?;

        let key = self.insert_row(
            T::TABLE_NAME,
            T::KEY_COLUMN,
            strategy,
            &T::sequence_name(),
            entity.to_row(),
        )?;
        entity.set_key(key.clone());

        let okey = ObjectKey::new(TypeId::of::<T>(), &key);
        engine.mark_visited(okey);
        engine.cascade_after_insert(self, &key, &targets)?;

        let row_values = entity.to_row();
        let arc: EntityRef<T> = Arc::new(RwLock::new(entity.clone()));
        self.register_cell(
            okey,
            T::TABLE_NAME,
            T::KEY_COLUMN,
            key,
            Box::new(Arc::clone(&arc)),
            Arc::as_ptr(&arc).cast::<()>() as usize,
            entman_core::cell_clone::<T>,
            entman_core::row_probe::<T>,
            T::ASSOCIATIONS,
            row_values,
        )?;
        Ok(arc)
    }

    fn find_entity<T: Entity>(
        &mut self,
        handle: &SourceHandle,
        key: &Value,
    ) -> Result<Option<EntityRef<T>>> {
        let catalog = Arc::clone(&self.catalog);
        let descriptor = Self::registered_descriptor::<T>(&catalog)?;

        let okey = ObjectKey::new(TypeId::of::<T>(), key);
        match self.tracker.state_of(&okey) {
            Some(ManagedState::Removed) => return Ok(None),
            Some(_) => {
                if let Some(cell) = self.identity_map.get(&okey) {
                    if let Ok(arc) = cell.downcast::<EntityRef<T>>() {
                        return Ok(Some(*arc));
                    }
                }
            }
            None => {}
        }

        let columns: Vec<&str> = descriptor.columns.iter().map(|c| c.name).collect();
        let statement = sql::select_sql(descriptor.table, &columns, &[descriptor.key_column], None);
        let rows = self
            .executor
            .query(&statement, std::slice::from_ref(key))?;
        match rows.first() {
            Some(row) => Ok(Some(materialize::<T>(self, handle, row)?)),
            None => Ok(None),
        }
    }

    fn merge_entity<T: Entity>(
        &mut self,
        handle: &SourceHandle,
        entity: &T,
    ) -> Result<EntityRef<T>> {
        let Some(key) = entity.key() else {
            // No identity: merge degenerates to persist of a copy.
            let mut copy = entity.clone();
            return self.persist_entity(&mut copy);
        };

        let okey = ObjectKey::new(TypeId::of::<T>(), &key);
        let representative = match self.tracker.state_of(&okey) {
            Some(ManagedState::Removed) => {
                return Err(Error::IllegalStateTransition {
                    from: ManagedState::Removed,
                    event: LifecycleEvent::Merge,
                });
            }
            Some(_) => {
                let cell = self.identity_map.get(&okey).ok_or_else(|| {
                    Error::Custom("tracked instance missing from identity map".into())
                })?;
                let arc = cell
                    .downcast::<EntityRef<T>>()
                    .map_err(|_| Error::Custom("identity cell has unexpected type".into()))?;
                *arc
            }
            None => self.find_entity::<T>(handle, &key)?.ok_or_else(|| {
                Error::Custom(format!(
                    "cannot merge '{}' with key {key}: no stored row",
                    T::TABLE_NAME
                ))
            })?,
        };

        representative
            .write()
            .expect("lock poisoned")
            .apply_row(&Row::from_pairs(&entity.to_row()))?;
        self.tracker.transition(&okey, LifecycleEvent::Merge)?;
        Ok(representative)
    }

    fn remove_entity<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let Some(key) = entity.key() else {
            return Err(Error::IllegalStateTransition {
                from: ManagedState::Transient,
                event: LifecycleEvent::Remove,
            });
        };
        let okey = ObjectKey::new(TypeId::of::<T>(), &key);
        if self.tracker.state_of(&okey).is_none() {
            return Err(Error::IllegalStateTransition {
                from: ManagedState::Detached,
                event: LifecycleEvent::Remove,
            });
        }
        self.tracker.transition(&okey, LifecycleEvent::Remove)?;
        tracing::debug!(table = T::TABLE_NAME, key = %key, "scheduled removal");
        Ok(())
    }

    fn contains_entity<T: Entity>(&self, entity: &T) -> bool {
        entity.key().is_some_and(|key| {
            let okey = ObjectKey::new(TypeId::of::<T>(), &key);
            self.tracker.state_of(&okey) == Some(ManagedState::Managed)
        })
    }

    fn state_of_entity<T: Entity>(&self, entity: &T) -> Option<ManagedState> {
        let key = entity.key()?;
        self.tracker
            .state_of(&ObjectKey::new(TypeId::of::<T>(), &key))
    }

    /// SELECT for a query over a registered type.
    pub(crate) fn query_rows_for<T: Entity>(
        &mut self,
        filters: &[(&'static str, Value)],
        order_by: Option<(&'static str, bool)>,
    ) -> Result<Vec<Row>> {
        let catalog = Arc::clone(&self.catalog);
        let descriptor = Self::registered_descriptor::<T>(&catalog)?;

        let columns: Vec<&str> = descriptor.columns.iter().map(|c| c.name).collect();
        let filter_columns: Vec<&str> = filters.iter().map(|(c, _)| *c).collect();
        let statement = sql::select_sql(descriptor.table, &columns, &filter_columns, order_by);
        let params: Vec<Value> = filters.iter().map(|(_, v)| v.clone()).collect();
        Ok(self.executor.query(&statement, &params)?)
    }

    pub(crate) fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        self.executor.begin()?;
        self.in_transaction = true;
        Ok(())
    }

    pub(crate) fn commit_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.executor.commit()?;
        self.in_transaction = false;
        Ok(())
    }

    pub(crate) fn rollback_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.executor.rollback()?;
        self.in_transaction = false;
        Ok(())
    }
}

fn set_column(row: &mut Vec<(&'static str, Value)>, column: &'static str, value: Value) {
    match row.iter_mut().find(|(name, _)| *name == column) {
        Some(slot) => slot.1 = value,
        None => row.push((column, value)),
    }
}

impl AssociationSource for SessionCore {
    fn is_open(&self) -> bool {
        self.open
    }

    fn rows_for(&mut self, assoc: &'static AssociationInfo, owner_key: &Value) -> Result<Vec<Row>> {
        let target_columns: Vec<&str> = (assoc.target_columns_fn)()
            .iter()
            .map(|c| c.name)
            .collect();
        match assoc.ownership {
            entman_core::Ownership::TargetColumn { column } => {
                let statement =
                    sql::select_sql(assoc.target_table, &target_columns, &[column], None);
                Ok(self
                    .executor
                    .query(&statement, std::slice::from_ref(owner_key))?)
            }
            entman_core::Ownership::JoinTable(link) => {
                let keys_statement = sql::select_sql(
                    link.table,
                    &[link.target_column],
                    &[link.owner_column],
                    None,
                );
                let key_rows = self
                    .executor
                    .query(&keys_statement, std::slice::from_ref(owner_key))?;
                let keys: Vec<Value> = key_rows
                    .iter()
                    .filter_map(|row| row.get(0).cloned())
                    .collect();
                if keys.is_empty() {
                    return Ok(Vec::new());
                }
                let statement = sql::select_in_sql(
                    assoc.target_table,
                    &target_columns,
                    assoc.target_key_column,
                    keys.len(),
                );
                Ok(self.executor.query(&statement, &keys)?)
            }
            entman_core::Ownership::OwnerColumn { .. } => Err(Error::Custom(format!(
                "association '{}' is owner-keyed; fetch it by target key",
                assoc.name
            ))),
        }
    }

    fn row_by_key(
        &mut self,
        assoc: &'static AssociationInfo,
        target_key: &Value,
    ) -> Result<Option<Row>> {
        let target_columns: Vec<&str> = (assoc.target_columns_fn)()
            .iter()
            .map(|c| c.name)
            .collect();
        let statement = sql::select_sql(
            assoc.target_table,
            &target_columns,
            &[assoc.target_key_column],
            None,
        );
        let rows = self
            .executor
            .query(&statement, std::slice::from_ref(target_key))?;
        Ok(rows.into_iter().next())
    }

    fn identity_get(&self, type_id: TypeId, key: &Value) -> Option<IdentityCell> {
        self.identity_map.get(&ObjectKey::new(type_id, key))
    }

    fn admit(&mut self, entry: AdmitEntry) -> Result<()> {
        let okey = ObjectKey::new(entry.type_id, &entry.key);
        self.register_cell(
            okey,
            entry.table,
            entry.key_column,
            entry.key,
            entry.cell,
            entry.instance_addr,
            entry.clone_cell,
            entry.probe,
            entry.associations,
            entry.row,
        )
    }
}

// ============================================================================
// Session
// ============================================================================

/// The session is the central unit-of-work manager.
///
/// It owns one [`IdentityMap`] and one [`StateTracker`] per logical unit
/// of work, hands out lazy proxies bound to itself, and coordinates
/// flushing changes to the storage engine. `close()` is terminal: every
/// operation except a repeated `close()` fails with
/// `Error::SessionClosed` afterwards.
pub struct Session {
    core: Arc<RwLock<SessionCore>>,
    handle: SourceHandle,
}

impl Session {
    /// Create an open session over an executor and a schema catalog.
    #[must_use]
    pub fn new(executor: Box<dyn SqlExecutor>, catalog: Arc<SchemaCatalog>) -> Self {
        let core = Arc::new(RwLock::new(SessionCore {
            executor,
            catalog,
            identity_map: IdentityMap::new(),
            tracker: StateTracker::new(),
            open: true,
            in_transaction: false,
        }));
        // The typed and erased Arcs share one allocation; the weak
        // handle dies exactly when the session core is dropped.
        let erased: Arc<RwLock<dyn AssociationSource>> = core.clone();
        let handle = Arc::downgrade(&erased);
        drop(erased);
        Self { core, handle }
    }

    fn lock(&self) -> RwLockWriteGuard<'_, SessionCore> {
        self.core.write().expect("lock poisoned")
    }

    fn lock_open(&self) -> Result<RwLockWriteGuard<'_, SessionCore>> {
        let core = self.lock();
        if !core.open {
            return Err(Error::SessionClosed);
        }
        Ok(core)
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Make a transient instance managed: generate its key, insert its
    /// row, cascade persist across associations that ask for it, and
    /// register the managed representative.
    ///
    /// The passed instance receives the generated key (and so do staged
    /// children, through their shared references). Fails with
    /// `EntityAlreadyManaged` when this session already manages the
    /// identity, and with `IllegalStateTransition` for removed or
    /// detached instances.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(table = T::TABLE_NAME))]
    pub fn persist<T: Entity>(&mut self, entity: &mut T) -> Result<EntityRef<T>> {
        let mut core = self.lock_open()?;
        core.persist_entity(entity)
    }

    /// Look up an instance by key: identity-map hit first, storage fetch
    /// otherwise. Returns `None` when no row matches.
    #[tracing::instrument(level = "debug", skip(self, key), fields(table = T::TABLE_NAME))]
    pub fn find<T: Entity>(&mut self, key: impl Into<Value>) -> Result<Option<EntityRef<T>>> {
        let key = key.into();
        let mut core = self.lock_open()?;
        core.find_entity::<T>(&self.handle, &key)
    }

    /// Merge a detached or transient instance: copy its column values
    /// onto the managed representative (loading it first if necessary)
    /// and return that representative. The passed instance is left
    /// untouched. Without a key this behaves like `persist`.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(table = T::TABLE_NAME))]
    pub fn merge<T: Entity>(&mut self, entity: &T) -> Result<EntityRef<T>> {
        let mut core = self.lock_open()?;
        core.merge_entity(&self.handle, entity)
    }

    /// Schedule a managed instance for deletion. The physical DELETE
    /// happens at flush/commit, not immediately; until then the
    /// instance stays in the identity map in the `Removed` state.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(table = T::TABLE_NAME))]
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<()> {
        let mut core = self.lock_open()?;
        core.remove_entity(entity)
    }

    /// Whether this session currently manages the instance's identity.
    ///
    /// Fails with `Error::SessionClosed` after `close()`: state
    /// inspection on a dead session is an error, not `false`.
    pub fn contains<T: Entity>(&self, entity: &T) -> Result<bool> {
        let core = self.lock_open()?;
        Ok(core.contains_entity(entity))
    }

    /// The tracked lifecycle state of the instance's identity, if any.
    ///
    /// Fails with `Error::SessionClosed` after `close()`.
    pub fn state_of<T: Entity>(&self, entity: &T) -> Result<Option<ManagedState>> {
        let core = self.lock_open()?;
        Ok(core.state_of_entity(entity))
    }

    /// Start building a query for `T`. Results materialize through the
    /// identity map, so a row already managed in this session yields the
    /// identical instance.
    #[must_use]
    pub fn query<T: Entity>(&self) -> Query<T> {
        Query::new(Arc::clone(&self.core), self.handle.clone())
    }

    /// Translate in-memory changes into storage writes: pending
    /// removals first (including opt-in cascade removals), then updates
    /// computed from snapshot diffs. Inserts already happened at
    /// `persist` time. A storage failure propagates without committing
    /// anything further.
    pub fn flush(&mut self) -> Result<()> {
        let mut core = self.lock_open()?;
        let report = flush::flush(&mut core)?;
        tracing::debug!(
            deleted = report.deleted,
            updated = report.updated,
            "flush complete"
        );
        Ok(())
    }

    /// Begin a transaction (no-op when one is already active).
    pub fn begin(&mut self) -> Result<()> {
        let mut core = self.lock_open()?;
        core.begin_transaction()
    }

    /// Flush pending changes and commit the transaction.
    pub fn commit(&mut self) -> Result<()> {
        let mut core = self.lock_open()?;
        flush::flush(&mut core)?;
        core.commit_transaction()
    }

    /// Roll back the transaction and discard the persistence context:
    /// every tracked instance becomes detached and pending work is
    /// dropped. Close the session afterwards rather than continuing to
    /// work with it.
    pub fn rollback(&mut self) -> Result<()> {
        let mut core = self.lock_open()?;
        let result = core.rollback_transaction();
        core.tracker.clear();
        core.identity_map.clear();
        result
    }

    /// Close the session. Pending removals are physically deleted
    /// first, then every managed instance becomes detached and the
    /// identity map is destroyed. Repeated `close()` is a no-op; every
    /// other operation fails afterwards. Unresolved lazy proxies bound
    /// to this session become permanently unusable.
    pub fn close(&mut self) -> Result<()> {
        let mut core = self.lock();
        if !core.open {
            return Ok(());
        }
        tracing::debug!(tracked = core.tracker.len(), "closing session");
        let removals = flush::flush_removals(&mut core);
        let transaction = if core.in_transaction {
            if removals.is_ok() {
                core.commit_transaction()
            } else {
                core.rollback_transaction()
            }
        } else {
            Ok(())
        };
        core.tracker.clear();
        core.identity_map.clear();
        core.open = false;
        removals?;
        transaction
    }

    /// Scoped unit of work: begin, run `work`, commit on success or
    /// roll back on any error, and close the session on every exit
    /// path. The work's error (or the commit error) is re-raised after
    /// rollback.
    pub fn run_in_transaction<R, F>(mut self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> Result<R>,
    {
        self.begin()?;
        let outcome = work(&mut self).and_then(|value| {
            self.commit()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => {
                self.close()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback() {
                    tracing::warn!(%rollback_error, "rollback failed after error");
                }
                let _ = self.close();
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("Session")
            .field("open", &core.open)
            .field("in_transaction", &core.in_transaction)
            .field("tracked", &core.tracker.len())
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

//! Lazy association resolution.
//!
//! Associations are modeled as explicit tagged state rather than
//! transparent interception: a field is either `Loaded` with real data
//! or holds a [`ProxyHandle`] back to the session that produced it.
//! Resolution is an explicit `resolve()` call that fails with
//! `Error::LazyInitialization` when the owning session is gone: lazily,
//! exactly at first access, never retried through another session.
//!
//! The session side of the protocol is the [`AssociationSource`] trait.
//! It lives here so proxy types need no dependency on the session crate:
//! the concrete session implements it and hands out weak handles to its
//! shared core. A proxy that resolved before the session closed keeps
//! its materialized data and stays readable afterwards.

use crate::association::AssociationInfo;
use crate::entity::{Entity, EntityNode};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// A managed entity instance shared through the identity map.
pub type EntityRef<T> = Arc<RwLock<T>>;

/// Type-erased identity-map cell. Actually stores `EntityRef<T>` for
/// some entity type `T`.
pub type IdentityCell = Box<dyn Any + Send + Sync>;

/// Monomorphized accessor reading the current row values out of a cell.
/// Used for dirty checking at flush without knowing the concrete type.
pub type RowProbe = fn(&IdentityCell) -> Option<Vec<(&'static str, Value)>>;

/// The `RowProbe` instance for entity type `T`.
pub fn row_probe<T: Entity>(cell: &IdentityCell) -> Option<Vec<(&'static str, Value)>> {
    cell.downcast_ref::<EntityRef<T>>()
        .map(|arc| arc.read().expect("lock poisoned").to_row())
}

/// Monomorphized clone of a type-erased cell: the clone shares the same
/// allocation (`Arc::clone`), preserving instance identity.
pub type CellClone = fn(&IdentityCell) -> Option<IdentityCell>;

/// The `CellClone` instance for entity type `T`.
pub fn cell_clone<T: Entity>(cell: &IdentityCell) -> Option<IdentityCell> {
    cell.downcast_ref::<EntityRef<T>>()
        .map(|arc| Box::new(Arc::clone(arc)) as IdentityCell)
}

/// Weak handle to the owning session's shared core.
pub type SourceHandle = Weak<RwLock<dyn AssociationSource>>;

/// The slice of session behavior that association resolution needs.
///
/// Implemented by the session's shared core. Object-safe so proxy
/// handles can reference it without generics.
pub trait AssociationSource: Send + Sync {
    /// Whether the owning session is still open.
    fn is_open(&self) -> bool;

    /// Fetch the rows of a to-many association for the given owner key.
    fn rows_for(&mut self, assoc: &'static AssociationInfo, owner_key: &Value) -> Result<Vec<Row>>;

    /// Fetch the single row of a to-one association by target key.
    fn row_by_key(
        &mut self,
        assoc: &'static AssociationInfo,
        target_key: &Value,
    ) -> Result<Option<Row>>;

    /// Identity-map lookup: a clone of the stored cell, if present.
    fn identity_get(&self, type_id: TypeId, key: &Value) -> Option<IdentityCell>;

    /// Register a freshly materialized instance as managed.
    fn admit(&mut self, entry: AdmitEntry) -> Result<()>;
}

/// Registration record for a newly materialized or persisted instance.
pub struct AdmitEntry {
    /// Entity type id.
    pub type_id: TypeId,
    /// Storage table.
    pub table: &'static str,
    /// Primary key column.
    pub key_column: &'static str,
    /// Primary key value.
    pub key: Value,
    /// Type-erased `EntityRef<T>`.
    pub cell: IdentityCell,
    /// Address of the shared allocation, for same-instance checks.
    pub instance_addr: usize,
    /// Column values at registration time (snapshot basis).
    pub row: Vec<(&'static str, Value)>,
    /// Accessor for current row values of the cell.
    pub probe: RowProbe,
    /// Identity-preserving clone of the cell.
    pub clone_cell: CellClone,
    /// Association metadata of the entity type (cascade-remove planning).
    pub associations: &'static [AssociationInfo],
}

/// Unresolved association state: who owns it and where to fetch from.
#[derive(Clone)]
pub struct ProxyHandle {
    assoc: &'static AssociationInfo,
    owner_key: Value,
    source: SourceHandle,
}

impl ProxyHandle {
    /// Create a handle for the given association and owner key.
    #[must_use]
    pub fn new(assoc: &'static AssociationInfo, owner_key: Value, source: SourceHandle) -> Self {
        Self {
            assoc,
            owner_key,
            source,
        }
    }

    /// The association this handle belongs to.
    #[must_use]
    pub fn association(&self) -> &'static AssociationInfo {
        self.assoc
    }

    fn closed_error(&self) -> Error {
        Error::LazyInitialization {
            association: self.assoc.name,
            reason: "owning session is closed",
        }
    }

    /// Upgrade to the live session core, failing if the session is gone.
    fn upgrade(&self) -> Result<Arc<RwLock<dyn AssociationSource>>> {
        self.source.upgrade().ok_or_else(|| self.closed_error())
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("association", &self.assoc.name)
            .field("owner_key", &self.owner_key)
            .finish()
    }
}

fn unwired_error(name: &'static str) -> Error {
    Error::LazyInitialization {
        association: name,
        reason: "association is not bound to a session",
    }
}

/// Internal association state shared by `LazyRef` and `LazyMany`.
enum AssocState<V> {
    /// Constructed outside any session; resolution is impossible.
    Unwired(&'static str),
    /// Proxy handed out by a session; resolves on first access.
    Unresolved(ProxyHandle),
    /// Materialized data, cached permanently.
    Loaded(V),
}

impl<V> AssocState<V> {
    fn label(&self) -> &'static str {
        match self {
            AssocState::Unwired(_) => "unwired",
            AssocState::Unresolved(_) => "unresolved",
            AssocState::Loaded(_) => "loaded",
        }
    }
}

// ============================================================================
// LazyMany<T>
// ============================================================================

/// A to-many association.
///
/// Transient instances start `Loaded` and stage children with [`push`];
/// instances materialized by a session carry an unresolved proxy until
/// first access (lazy) or are populated at load time (eager).
///
/// [`push`]: LazyMany::push
pub struct LazyMany<T: Entity> {
    state: AssocState<Vec<EntityRef<T>>>,
}

impl<T: Entity> LazyMany<T> {
    /// An empty, loaded collection (transient staging).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AssocState::Loaded(Vec::new()),
        }
    }

    /// Placeholder for `from_row`; replaced by `wire_associations`.
    #[must_use]
    pub fn unwired(name: &'static str) -> Self {
        Self {
            state: AssocState::Unwired(name),
        }
    }

    /// An unresolved proxy (session use).
    #[must_use]
    pub fn unresolved(handle: ProxyHandle) -> Self {
        Self {
            state: AssocState::Unresolved(handle),
        }
    }

    /// An already-loaded collection (eager fetch).
    #[must_use]
    pub fn loaded(items: Vec<EntityRef<T>>) -> Self {
        Self {
            state: AssocState::Loaded(items),
        }
    }

    /// Whether the collection is materialized.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, AssocState::Loaded(_))
    }

    /// The materialized items, if loaded.
    #[must_use]
    pub fn get(&self) -> Option<&[EntityRef<T>]> {
        match &self.state {
            AssocState::Loaded(items) => Some(items),
            _ => None,
        }
    }

    /// Number of materialized items (0 when unresolved).
    #[must_use]
    pub fn len(&self) -> usize {
        self.get().map_or(0, <[EntityRef<T>]>::len)
    }

    /// Whether no items are materialized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the materialized items (empty when unresolved).
    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef<T>> {
        self.get().unwrap_or(&[]).iter()
    }

    /// Stage a child on a loaded collection.
    ///
    /// Fails on an unresolved collection: resolve it first.
    pub fn push(&mut self, entity: T) -> Result<EntityRef<T>> {
        match &mut self.state {
            AssocState::Loaded(items) => {
                let arc: EntityRef<T> = Arc::new(RwLock::new(entity));
                items.push(Arc::clone(&arc));
                Ok(arc)
            }
            AssocState::Unresolved(handle) => Err(Error::LazyInitialization {
                association: handle.assoc.name,
                reason: "cannot stage into an unresolved collection",
            }),
            AssocState::Unwired(name) => Err(unwired_error(*name)),
        }
    }

    /// Resolve the collection, fetching it on first access.
    ///
    /// Fails with `Error::LazyInitialization` when the owning session
    /// has closed. Once resolved the result is cached permanently and
    /// remains readable after the session closes.
    pub fn resolve(&mut self) -> Result<&[EntityRef<T>]> {
        match &self.state {
            AssocState::Loaded(_) => {}
            AssocState::Unwired(name) => return Err(unwired_error(*name)),
            AssocState::Unresolved(handle) => {
                let handle = handle.clone();
                let source_arc = handle.upgrade()?;
                let mut source = source_arc.write().expect("lock poisoned");
                if !source.is_open() {
                    return Err(handle.closed_error());
                }
                tracing::debug!(
                    association = handle.assoc.name,
                    owner_key = %handle.owner_key,
                    "resolving lazy collection"
                );
                let rows = source.rows_for(handle.assoc, &handle.owner_key)?;
                let mut items = Vec::with_capacity(rows.len());
                for row in &rows {
                    items.push(materialize::<T>(&mut *source, &handle.source, row)?);
                }
                drop(source);
                self.state = AssocState::Loaded(items);
            }
        }
        match &self.state {
            AssocState::Loaded(items) => Ok(items),
            // Resolution above always leaves the state loaded.
            _ => Err(Error::Custom("lazy collection in impossible state".into())),
        }
    }

    /// Cascade targets for this collection's materialized items.
    #[must_use]
    pub fn cascade_targets(&self, assoc: &'static AssociationInfo) -> Vec<CascadeTarget> {
        match &self.state {
            AssocState::Loaded(items) => items
                .iter()
                .map(|arc| CascadeTarget::of(assoc, arc))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl<T: Entity> Default for LazyMany<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for LazyMany<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            AssocState::Unwired(name) => AssocState::Unwired(*name),
            AssocState::Unresolved(handle) => AssocState::Unresolved(handle.clone()),
            AssocState::Loaded(items) => AssocState::Loaded(items.iter().map(Arc::clone).collect()),
        };
        Self { state }
    }
}

impl<T: Entity> fmt::Debug for LazyMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyMany")
            .field("state", &self.state.label())
            .field("len", &self.len())
            .finish()
    }
}

impl<'a, T: Entity> IntoIterator for &'a LazyMany<T> {
    type Item = &'a EntityRef<T>;
    type IntoIter = std::slice::Iter<'a, EntityRef<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// LazyRef<T>
// ============================================================================

/// A to-one association, carrying the foreign key value on the owning
/// side.
pub struct LazyRef<T: Entity> {
    fk: Option<Value>,
    state: AssocState<Option<EntityRef<T>>>,
}

impl<T: Entity> LazyRef<T> {
    /// A null association (no FK, loaded as none).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            fk: None,
            state: AssocState::Loaded(None),
        }
    }

    /// From a foreign key value without a session (as read by
    /// `from_row`); replaced by `wire_associations` on the load path.
    #[must_use]
    pub fn from_fk(name: &'static str, fk: Option<Value>) -> Self {
        match fk {
            None => Self::empty(),
            Some(fk) => Self {
                fk: Some(fk),
                state: AssocState::Unwired(name),
            },
        }
    }

    /// Pointing at an already-managed (or staged) target.
    #[must_use]
    pub fn to(target: EntityRef<T>) -> Self {
        Self {
            fk: None,
            state: AssocState::Loaded(Some(target)),
        }
    }

    /// An unresolved proxy (session use).
    #[must_use]
    pub fn unresolved(fk: Option<Value>, handle: ProxyHandle) -> Self {
        match fk {
            None => Self::empty(),
            Some(fk) => Self {
                fk: Some(fk),
                state: AssocState::Unresolved(handle),
            },
        }
    }

    /// An already-loaded target (eager fetch).
    #[must_use]
    pub fn loaded(fk: Option<Value>, target: Option<EntityRef<T>>) -> Self {
        Self {
            fk,
            state: AssocState::Loaded(target),
        }
    }

    /// Point at a new target.
    pub fn set(&mut self, target: EntityRef<T>) {
        self.fk = None;
        self.state = AssocState::Loaded(Some(target));
    }

    /// The foreign key value for the owner's row: the loaded target's
    /// key when available, the raw FK otherwise.
    #[must_use]
    pub fn fk_value(&self) -> Value {
        if let AssocState::Loaded(Some(target)) = &self.state {
            if let Some(key) = target.read().expect("lock poisoned").key() {
                return key;
            }
        }
        self.fk.clone().unwrap_or(Value::Null)
    }

    /// Whether the target is materialized (including loaded-null).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, AssocState::Loaded(_))
    }

    /// The materialized target, if loaded.
    #[must_use]
    pub fn get(&self) -> Option<EntityRef<T>> {
        match &self.state {
            AssocState::Loaded(target) => target.clone(),
            _ => None,
        }
    }

    /// Resolve the target, fetching it on first access.
    ///
    /// A null FK resolves to `None` without touching the session. Fails
    /// with `Error::LazyInitialization` when the owning session has
    /// closed; a previously resolved target stays readable.
    pub fn resolve(&mut self) -> Result<Option<EntityRef<T>>> {
        let handle = match &self.state {
            AssocState::Loaded(target) => return Ok(target.clone()),
            AssocState::Unwired(name) => return Err(unwired_error(*name)),
            AssocState::Unresolved(handle) => handle.clone(),
        };
        let Some(fk) = self.fk.clone() else {
            self.state = AssocState::Loaded(None);
            return Ok(None);
        };

        let source_arc = handle.upgrade()?;
        let mut source = source_arc.write().expect("lock poisoned");
        if !source.is_open() {
            return Err(handle.closed_error());
        }
        tracing::debug!(
            association = handle.assoc.name,
            fk = %fk,
            "resolving lazy reference"
        );
        let target = match source.row_by_key(handle.assoc, &fk)? {
            Some(row) => Some(materialize::<T>(&mut *source, &handle.source, &row)?),
            None => None,
        };
        drop(source);
        self.state = AssocState::Loaded(target.clone());
        Ok(target)
    }

    /// Cascade target for the materialized reference, if any.
    #[must_use]
    pub fn cascade_targets(&self, assoc: &'static AssociationInfo) -> Vec<CascadeTarget> {
        match &self.state {
            AssocState::Loaded(Some(target)) => vec![CascadeTarget::of(assoc, target)],
            _ => Vec::new(),
        }
    }
}

impl<T: Entity> Default for LazyRef<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            AssocState::Unwired(name) => AssocState::Unwired(*name),
            AssocState::Unresolved(handle) => AssocState::Unresolved(handle.clone()),
            AssocState::Loaded(target) => AssocState::Loaded(target.clone()),
        };
        Self {
            fk: self.fk.clone(),
            state,
        }
    }
}

impl<T: Entity> fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("state", &self.state.label())
            .field("fk", &self.fk)
            .finish()
    }
}

// ============================================================================
// Cascade targets
// ============================================================================

/// One associated instance reachable from an owner, type-erased for the
/// cascade walk.
pub struct CascadeTarget {
    /// The association it was reached through.
    pub assoc: &'static AssociationInfo,
    /// Concrete entity type id.
    pub type_id: TypeId,
    /// The shared instance, viewed as a node.
    pub node: Arc<RwLock<dyn EntityNode>>,
    /// The same instance as a type-erased identity cell.
    pub cell: IdentityCell,
    /// Row accessor for the cell.
    pub probe: RowProbe,
    /// Identity-preserving clone of the cell.
    pub clone_cell: CellClone,
    /// Association metadata of the target's type.
    pub target_associations: &'static [AssociationInfo],
}

impl CascadeTarget {
    /// Build a target from a shared entity reference.
    #[must_use]
    pub fn of<T: Entity>(assoc: &'static AssociationInfo, arc: &EntityRef<T>) -> Self {
        let node: Arc<RwLock<dyn EntityNode>> = arc.clone();
        Self {
            assoc,
            type_id: TypeId::of::<T>(),
            node,
            cell: Box::new(Arc::clone(arc)),
            probe: row_probe::<T>,
            clone_cell: cell_clone::<T>,
            target_associations: T::ASSOCIATIONS,
        }
    }

    /// Address of the shared allocation. Used for revisit detection
    /// while the graph is mid-walk and keys are not assigned yet; the
    /// (type, key) visited set takes over once keys exist.
    #[must_use]
    pub fn instance_addr(&self) -> usize {
        Arc::as_ptr(&self.node).cast::<()>() as usize
    }
}

// ============================================================================
// Materialization
// ============================================================================

/// Turn a fetched row into a managed instance, consulting the identity
/// map first so one key maps to one instance per session.
pub fn materialize<T: Entity>(
    source: &mut dyn AssociationSource,
    handle: &SourceHandle,
    row: &Row,
) -> Result<EntityRef<T>> {
    let mut entity = T::from_row(row)?;
    let key = entity.key().ok_or_else(|| {
        Error::Custom(format!(
            "row for '{}' has no value in key column '{}'",
            T::TABLE_NAME,
            T::KEY_COLUMN
        ))
    })?;

    if let Some(cell) = source.identity_get(TypeId::of::<T>(), &key) {
        if let Ok(existing) = cell.downcast::<EntityRef<T>>() {
            return Ok(*existing);
        }
    }

    {
        let mut ctx = AssociationContext::new(&mut *source, handle.clone());
        entity.wire_associations(&mut ctx)?;
    }

    let row_values = entity.to_row();
    let arc: EntityRef<T> = Arc::new(RwLock::new(entity));
    source.admit(AdmitEntry {
        type_id: TypeId::of::<T>(),
        table: T::TABLE_NAME,
        key_column: T::KEY_COLUMN,
        key,
        cell: Box::new(Arc::clone(&arc)),
        instance_addr: Arc::as_ptr(&arc).cast::<()>() as usize,
        row: row_values,
        probe: row_probe::<T>,
        clone_cell: cell_clone::<T>,
        associations: T::ASSOCIATIONS,
    })?;
    Ok(arc)
}

/// Context handed to `Entity::wire_associations` after materialization.
///
/// Lazy fields get proxies bound to the loading session; eager fields
/// are fetched immediately and bypass the proxy entirely.
pub struct AssociationContext<'a> {
    source: &'a mut dyn AssociationSource,
    handle: SourceHandle,
}

impl<'a> AssociationContext<'a> {
    /// Create a context over the session core and its weak handle.
    pub fn new(source: &'a mut dyn AssociationSource, handle: SourceHandle) -> Self {
        Self { source, handle }
    }

    /// A lazy to-many proxy for the given owner key.
    #[must_use]
    pub fn defer_many<T: Entity>(
        &self,
        assoc: &'static AssociationInfo,
        owner_key: &Value,
    ) -> LazyMany<T> {
        LazyMany::unresolved(ProxyHandle::new(
            assoc,
            owner_key.clone(),
            self.handle.clone(),
        ))
    }

    /// An eagerly fetched to-many collection for the given owner key.
    pub fn fetch_many<T: Entity>(
        &mut self,
        assoc: &'static AssociationInfo,
        owner_key: &Value,
    ) -> Result<LazyMany<T>> {
        let rows = self.source.rows_for(assoc, owner_key)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(materialize::<T>(&mut *self.source, &self.handle, row)?);
        }
        Ok(LazyMany::loaded(items))
    }

    /// A lazy to-one proxy for the given foreign key value.
    #[must_use]
    pub fn defer_ref<T: Entity>(
        &self,
        assoc: &'static AssociationInfo,
        fk: Option<Value>,
    ) -> LazyRef<T> {
        match fk {
            None => LazyRef::empty(),
            Some(fk) => {
                let handle = ProxyHandle::new(assoc, fk.clone(), self.handle.clone());
                LazyRef::unresolved(Some(fk), handle)
            }
        }
    }

    /// An eagerly fetched to-one reference for the given foreign key.
    pub fn fetch_ref<T: Entity>(
        &mut self,
        assoc: &'static AssociationInfo,
        fk: Option<Value>,
    ) -> Result<LazyRef<T>> {
        let Some(fk) = fk else {
            return Ok(LazyRef::empty());
        };
        let target = match self.source.row_by_key(assoc, &fk)? {
            Some(row) => Some(materialize::<T>(&mut *self.source, &self.handle, &row)?),
            None => None,
        };
        Ok(LazyRef::loaded(Some(fk), target))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

//! Entity lifecycle, identity-map, and lazy-association runtime.
//!
//! entman is a minimal object-relational runtime: entities are plain
//! structs with hand-written metadata, a [`Session`] is one unit of
//! work with one identity map and one state tracker, associations
//! resolve lazily through explicit proxies, and persist cascades across
//! the association graph per declared policy.
//!
//! The storage engine is abstract: anything implementing
//! [`SqlExecutor`] works, such as the in-memory engine in the
//! `entman-memory` crate.
//!
//! # Quick Start
//!
//! ```ignore
//! use entman::{SchemaCatalog, Session};
//!
//! let mut catalog = SchemaCatalog::new();
//! catalog.register::<Team>();
//! catalog.register::<Hero>();
//! let catalog = std::sync::Arc::new(catalog);
//!
//! let session = Session::new(executor, std::sync::Arc::clone(&catalog));
//! session.run_in_transaction(|session| {
//!     let mut team = Team::new("Avengers");
//!     team.heroes.push(Hero::new("Wanda"))?;
//!     session.persist(&mut team)?;          // cascades to the hero
//!     Ok(())
//! })?;
//! ```

pub use entman_core::{
    AssociationContext, AssociationInfo, CascadeOp, CascadePolicy, CascadeTarget, ColumnDef,
    Entity, EntityDescriptor, EntityRef, Error, FetchPolicy, FromValue, JoinTableInfo,
    KeyStrategy, LazyMany, LazyRef, LifecycleEvent, ManagedState, Multiplicity, Ownership, Result,
    Row, SchemaCatalog, SqlExecutor, SqlType, StorageError, StorageErrorKind, Value,
    find_association,
};
pub use entman_session::{
    IdentityMap, ObjectKey, Query, QueryIter, Session, StateTracker,
};

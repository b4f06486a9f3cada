//! Core types and traits for entman.
//!
//! This crate provides the foundational abstractions for the entity
//! lifecycle runtime:
//!
//! - `Entity` trait for struct-to-table mapping with static metadata
//! - `Value` and `Row` for dynamically-typed column data
//! - Association descriptors and the lazy-resolution types
//! - `SqlExecutor` contract for the external storage engine
//! - `SchemaCatalog` for table/column/association lookup and DDL

pub mod association;
pub mod entity;
pub mod error;
pub mod executor;
pub mod lazy;
pub mod row;
pub mod schema;
pub mod value;

pub use association::{
    AssociationInfo, CascadeOp, CascadePolicy, FetchPolicy, JoinTableInfo, Multiplicity, Ownership,
    find_association,
};
pub use entity::{Entity, EntityNode, KeyStrategy, LifecycleEvent, ManagedState};
pub use error::{Error, Result, StorageError, StorageErrorKind, TypeError};
pub use executor::SqlExecutor;
pub use lazy::{
    AdmitEntry, AssociationContext, AssociationSource, CascadeTarget, CellClone, EntityRef,
    IdentityCell, LazyMany, LazyRef, ProxyHandle, RowProbe, SourceHandle, cell_clone, materialize,
    row_probe,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{ColumnDef, EntityDescriptor, SchemaCatalog, SqlType};
pub use value::Value;

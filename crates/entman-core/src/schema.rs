//! Schema catalog: per-type table/column/association lookup and DDL.

use crate::association::{AssociationInfo, Ownership};
use crate::entity::{Entity, KeyStrategy};
use std::any::TypeId;
use std::collections::HashMap;

/// Storage column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// BOOLEAN
    Boolean,
    /// 32-bit INTEGER
    Integer,
    /// 64-bit BIGINT
    BigInt,
    /// 64-bit DOUBLE
    Double,
    /// TEXT
    Text,
    /// BLOB
    Blob,
}

impl SqlType {
    /// DDL spelling of this type.
    #[must_use]
    pub const fn ddl_name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
        }
    }
}

/// Metadata for one declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage type.
    pub sql_type: SqlType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether this is the primary key column.
    pub primary_key: bool,
}

impl ColumnDef {
    /// Create a nullable, non-key column.
    #[must_use]
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Mark the column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Everything the catalog records about one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Table name.
    pub table: &'static str,
    /// Primary key column.
    pub key_column: &'static str,
    /// Key generation strategy.
    pub key_strategy: KeyStrategy,
    /// Declared columns.
    pub columns: &'static [ColumnDef],
    /// Declared associations.
    pub associations: &'static [AssociationInfo],
}

/// Registry mapping entity types to their table/column layout.
///
/// Built up-front by registering every entity type the application uses;
/// the session consults it for column projections and key strategies,
/// and the DDL generator derives the full physical schema from it,
/// including foreign key columns and link tables that associations
/// imply but no entity declares as a field.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    by_type: HashMap<TypeId, EntityDescriptor>,
    by_table: HashMap<&'static str, TypeId>,
}

impl SchemaCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type.
    ///
    /// Registering the same type twice is a no-op.
    pub fn register<T: Entity>(&mut self) {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return;
        }
        tracing::debug!(table = T::TABLE_NAME, "registering entity type");
        self.by_type.insert(
            type_id,
            EntityDescriptor {
                table: T::TABLE_NAME,
                key_column: T::KEY_COLUMN,
                key_strategy: T::KEY_STRATEGY,
                columns: T::columns(),
                associations: T::ASSOCIATIONS,
            },
        );
        self.by_table.insert(T::TABLE_NAME, type_id);
    }

    /// Look up a descriptor by entity type.
    #[must_use]
    pub fn descriptor_for<T: Entity>(&self) -> Option<&EntityDescriptor> {
        self.by_type.get(&TypeId::of::<T>())
    }

    /// Look up a descriptor by type id.
    #[must_use]
    pub fn descriptor_for_type(&self, type_id: TypeId) -> Option<&EntityDescriptor> {
        self.by_type.get(&type_id)
    }

    /// Look up a descriptor by table name.
    #[must_use]
    pub fn descriptor_for_table(&self, table: &str) -> Option<&EntityDescriptor> {
        self.by_table
            .get(table)
            .and_then(|tid| self.by_type.get(tid))
    }

    /// Ordered column list for an entity type.
    #[must_use]
    pub fn columns_for<T: Entity>(&self) -> Option<&'static [ColumnDef]> {
        self.descriptor_for::<T>().map(|d| d.columns)
    }

    /// Association descriptors for an entity type.
    #[must_use]
    pub fn associations_for<T: Entity>(&self) -> Option<&'static [AssociationInfo]> {
        self.descriptor_for::<T>().map(|d| d.associations)
    }

    /// Key strategy for an entity type.
    #[must_use]
    pub fn key_strategy_for<T: Entity>(&self) -> Option<KeyStrategy> {
        self.descriptor_for::<T>().map(|d| d.key_strategy)
    }

    /// Iterate all registered descriptors.
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.by_type.values()
    }

    /// CREATE TABLE statement for one entity table, including foreign
    /// key columns generated for target-side associations declared by
    /// other registered types.
    #[must_use]
    pub fn create_table_sql(&self, descriptor: &EntityDescriptor) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(descriptor.columns.len() + 2);
        for col in descriptor.columns {
            let mut part = format!("\"{}\" {}", col.name, col.sql_type.ddl_name());
            if col.primary_key {
                part.push_str(" PRIMARY KEY");
            } else if !col.nullable {
                part.push_str(" NOT NULL");
            }
            parts.push(part);
        }
        for fk in self.generated_fk_columns(descriptor) {
            parts.push(format!("\"{fk}\" BIGINT"));
        }
        format!("CREATE TABLE \"{}\" ({})", descriptor.table, parts.join(", "))
    }

    /// DDL for the whole registered schema: one CREATE TABLE per entity
    /// plus one per link table implied by an association.
    #[must_use]
    pub fn create_all_sql(&self) -> Vec<String> {
        let mut tables: Vec<&EntityDescriptor> = self.by_type.values().collect();
        tables.sort_by_key(|d| d.table);

        let mut out: Vec<String> = tables
            .iter()
            .map(|d| self.create_table_sql(d))
            .collect();

        let mut links: Vec<String> = Vec::new();
        for descriptor in &tables {
            for assoc in descriptor.associations {
                if let Ownership::JoinTable(link) = assoc.ownership {
                    links.push(format!(
                        "CREATE TABLE \"{}\" (\"{}\" BIGINT, \"{}\" BIGINT)",
                        link.table, link.owner_column, link.target_column
                    ));
                }
            }
        }
        links.sort();
        links.dedup();
        out.extend(links);
        out
    }

    /// FK columns that other types' target-side associations add to this
    /// table, excluding any the table already declares as a field.
    fn generated_fk_columns(&self, descriptor: &EntityDescriptor) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for other in self.by_type.values() {
            for assoc in other.associations {
                if assoc.target_table != descriptor.table {
                    continue;
                }
                if let Ownership::TargetColumn { column } = assoc.ownership {
                    let declared = descriptor.columns.iter().any(|c| c.name == column);
                    if !declared && !out.contains(&column) {
                        out.push(column);
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }
}

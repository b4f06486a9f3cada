//! Association metadata.
//!
//! Associations are described by static descriptors on each `Entity`.
//! Higher layers (session, cascade engine, lazy resolution) use them to
//! generate fetches and propagate operations without runtime reflection.

use crate::schema::ColumnDef;

/// Whether an association points at one row or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    /// To-one: `Post` has one `Author`.
    One,
    /// To-many: one `Team` has many `Hero`s.
    Many,
}

/// When the target data is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Fetched while the owner loads; never proxied.
    Eager,
    /// Fetched on first access through a proxy.
    #[default]
    Lazy,
}

/// Operations that can be cascaded across an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOp {
    /// Propagate `persist` to reachable transient instances.
    Persist,
    /// Propagate `remove` to target rows.
    Remove,
}

/// Declared cascade policy for an association.
///
/// Cascade sets are per-operation, not global: `Persist` alone means a
/// root's removal leaves previously-persisted targets intact. That
/// asymmetry is deliberate: removal never cascades unless the
/// descriptor says `Remove` or `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadePolicy {
    /// No operation is propagated.
    #[default]
    None,
    /// Only `persist` is propagated.
    Persist,
    /// Only `remove` is propagated.
    Remove,
    /// Both `persist` and `remove` are propagated.
    All,
}

impl CascadePolicy {
    /// Check whether this policy propagates the given operation.
    #[must_use]
    pub const fn includes(self, op: CascadeOp) -> bool {
        match (self, op) {
            (CascadePolicy::All, _)
            | (CascadePolicy::Persist, CascadeOp::Persist)
            | (CascadePolicy::Remove, CascadeOp::Remove) => true,
            _ => false,
        }
    }
}

/// Link table metadata for associations mapped through a separate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTableInfo {
    /// The link table name (e.g. `"hero_power"`).
    pub table: &'static str,
    /// Column pointing at the owning entity (e.g. `"hero_id"`).
    pub owner_column: &'static str,
    /// Column pointing at the target entity (e.g. `"power_id"`).
    pub target_column: &'static str,
}

impl JoinTableInfo {
    /// Create a new link-table definition.
    #[must_use]
    pub const fn new(
        table: &'static str,
        owner_column: &'static str,
        target_column: &'static str,
    ) -> Self {
        Self {
            table,
            owner_column,
            target_column,
        }
    }
}

/// Which side holds the foreign key, or whether a link table is used.
///
/// This decides fetch SQL, cascade insertion order, and where generated
/// columns land in the DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The owning entity's table holds the foreign key (to-one).
    OwnerColumn {
        /// FK column on the owner's table.
        column: &'static str,
    },
    /// The target entity's table holds the foreign key (to-many).
    TargetColumn {
        /// FK column on the target's table. Generated in the DDL when
        /// the target type does not declare it itself.
        column: &'static str,
    },
    /// A separate link table joins the two sides.
    JoinTable(JoinTableInfo),
}

/// Metadata about one association field.
#[derive(Debug, Clone, Copy)]
pub struct AssociationInfo {
    /// Name of the association field.
    pub name: &'static str,

    /// The target entity's table name.
    pub target_table: &'static str,

    /// The target entity's key column.
    pub target_key_column: &'static str,

    /// One or many.
    pub multiplicity: Multiplicity,

    /// Eager or lazy.
    pub fetch: FetchPolicy,

    /// Cascade policy.
    pub cascade: CascadePolicy,

    /// Foreign key placement.
    pub ownership: Ownership,

    /// Function pointer returning the target's column metadata, so
    /// fetches can project the target's columns without reflection.
    pub target_columns_fn: fn() -> &'static [ColumnDef],
}

impl AssociationInfo {
    fn no_columns() -> &'static [ColumnDef] {
        &[]
    }

    /// A to-one association with the FK on the owner's table.
    #[must_use]
    pub const fn to_one(
        name: &'static str,
        target_table: &'static str,
        target_key_column: &'static str,
        owner_column: &'static str,
    ) -> Self {
        Self {
            name,
            target_table,
            target_key_column,
            multiplicity: Multiplicity::One,
            fetch: FetchPolicy::Lazy,
            cascade: CascadePolicy::None,
            ownership: Ownership::OwnerColumn {
                column: owner_column,
            },
            target_columns_fn: Self::no_columns,
        }
    }

    /// A to-many association with the FK on the target's table.
    #[must_use]
    pub const fn to_many(
        name: &'static str,
        target_table: &'static str,
        target_key_column: &'static str,
        target_fk_column: &'static str,
    ) -> Self {
        Self {
            name,
            target_table,
            target_key_column,
            multiplicity: Multiplicity::Many,
            fetch: FetchPolicy::Lazy,
            cascade: CascadePolicy::None,
            ownership: Ownership::TargetColumn {
                column: target_fk_column,
            },
            target_columns_fn: Self::no_columns,
        }
    }

    /// A to-many association mapped through a link table.
    #[must_use]
    pub const fn many_via(
        name: &'static str,
        target_table: &'static str,
        target_key_column: &'static str,
        link: JoinTableInfo,
    ) -> Self {
        Self {
            name,
            target_table,
            target_key_column,
            multiplicity: Multiplicity::Many,
            fetch: FetchPolicy::Lazy,
            cascade: CascadePolicy::None,
            ownership: Ownership::JoinTable(link),
            target_columns_fn: Self::no_columns,
        }
    }

    /// Set the fetch policy.
    #[must_use]
    pub const fn fetch(mut self, policy: FetchPolicy) -> Self {
        self.fetch = policy;
        self
    }

    /// Set the cascade policy.
    #[must_use]
    pub const fn cascade(mut self, policy: CascadePolicy) -> Self {
        self.cascade = policy;
        self
    }

    /// Provide the target type's `Entity::columns` function pointer.
    #[must_use]
    pub const fn target_columns(mut self, f: fn() -> &'static [ColumnDef]) -> Self {
        self.target_columns_fn = f;
        self
    }

    /// The FK column on the owner's table, for to-one associations.
    #[must_use]
    pub const fn owner_column(&self) -> Option<&'static str> {
        match self.ownership {
            Ownership::OwnerColumn { column } => Some(column),
            _ => None,
        }
    }
}

/// Find an association by field name in a descriptor slice.
#[must_use]
pub fn find_association(
    associations: &'static [AssociationInfo],
    name: &str,
) -> Option<&'static AssociationInfo> {
    associations.iter().find(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_policy_membership() {
        assert!(CascadePolicy::Persist.includes(CascadeOp::Persist));
        assert!(!CascadePolicy::Persist.includes(CascadeOp::Remove));
        assert!(!CascadePolicy::None.includes(CascadeOp::Persist));
        assert!(CascadePolicy::All.includes(CascadeOp::Remove));
        assert!(CascadePolicy::Remove.includes(CascadeOp::Remove));
        assert!(!CascadePolicy::Remove.includes(CascadeOp::Persist));
    }

    #[test]
    fn builders_set_ownership() {
        const HEROES: AssociationInfo = AssociationInfo::to_many("heroes", "hero", "id", "team_id");
        assert_eq!(HEROES.multiplicity, Multiplicity::Many);
        assert_eq!(
            HEROES.ownership,
            Ownership::TargetColumn { column: "team_id" }
        );
        assert_eq!(HEROES.fetch, FetchPolicy::Lazy);

        const TEAM: AssociationInfo =
            AssociationInfo::to_one("team", "team", "id", "team_id").fetch(FetchPolicy::Eager);
        assert_eq!(TEAM.owner_column(), Some("team_id"));
        assert_eq!(TEAM.fetch, FetchPolicy::Eager);

        const POWERS: AssociationInfo = AssociationInfo::many_via(
            "powers",
            "power",
            "id",
            JoinTableInfo::new("hero_power", "hero_id", "power_id"),
        )
        .cascade(CascadePolicy::Persist);
        assert!(matches!(POWERS.ownership, Ownership::JoinTable(_)));
        assert!(POWERS.cascade.includes(CascadeOp::Persist));
    }

    #[test]
    fn find_by_name() {
        static ASSOCS: &[AssociationInfo] = &[
            AssociationInfo::to_many("heroes", "hero", "id", "team_id"),
            AssociationInfo::to_one("coach", "coach", "id", "coach_id"),
        ];
        assert_eq!(find_association(ASSOCS, "coach").unwrap().name, "coach");
        assert!(find_association(ASSOCS, "missing").is_none());
    }
}

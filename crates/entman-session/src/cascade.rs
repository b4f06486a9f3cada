//! Cascade engine: persist-by-reachability over declared associations.
//!
//! The walk is depth-first and carries two guards against cyclic
//! graphs: a visited set keyed by (type, key) for instances that have
//! keys, and an address set for instances still mid-insert whose keys
//! do not exist yet. Reference equality alone is not enough once
//! instances can be reconstructed from rows; the key-based set is the
//! authoritative one.
//!
//! Remove is handled elsewhere (flush) and is never implied by a
//! persist cascade.

use crate::SessionCore;
use crate::identity_map::ObjectKey;
use entman_core::{
    CascadeOp, CascadeTarget, Error, ManagedState, Multiplicity, Ownership, Result, Value,
};
use std::collections::HashSet;

/// Drives one persist cascade across an entity graph.
pub(crate) struct CascadeEngine {
    visited_keys: HashSet<ObjectKey>,
    visiting_addrs: HashSet<usize>,
}

impl CascadeEngine {
    pub(crate) fn new() -> Self {
        Self {
            visited_keys: HashSet::new(),
            visiting_addrs: HashSet::new(),
        }
    }

    /// Record an already-persisted identity so revisits become no-ops.
    pub(crate) fn mark_visited(&mut self, key: ObjectKey) {
        self.visited_keys.insert(key);
    }

    /// Phase one: persist the targets the owner's foreign keys point
    /// at, so the owner's row can reference them.
    ///
    /// A loaded to-one target that is transient and not covered by a
    /// persist cascade is an error: inserting the owner would silently
    /// write a null reference.
    pub(crate) fn cascade_before_insert(
        &mut self,
        core: &mut SessionCore,
        targets: &[CascadeTarget],
    ) -> Result<()> {
        for target in targets {
            if target.assoc.multiplicity != Multiplicity::One {
                continue;
            }
            let Ownership::OwnerColumn { .. } = target.assoc.ownership else {
                continue;
            };
            if target.assoc.cascade.includes(CascadeOp::Persist) {
                self.persist_node(core, target, None)?;
            } else if target.node.read().expect("lock poisoned").key_value().is_none() {
                return Err(Error::Custom(format!(
                    "association '{}' references a transient instance and does not cascade persist",
                    target.assoc.name
                )));
            }
        }
        Ok(())
    }

    /// Phase two: persist to-many children after the owner's insert,
    /// injecting the owner's key where the child table holds the
    /// foreign key, and writing link rows where a join table does.
    pub(crate) fn cascade_after_insert(
        &mut self,
        core: &mut SessionCore,
        owner_key: &Value,
        targets: &[CascadeTarget],
    ) -> Result<()> {
        for target in targets {
            if target.assoc.multiplicity != Multiplicity::Many {
                continue;
            }
            match target.assoc.ownership {
                Ownership::TargetColumn { column } => {
                    if target.assoc.cascade.includes(CascadeOp::Persist) {
                        self.persist_node(core, target, Some((column, owner_key)))?;
                    }
                }
                Ownership::JoinTable(link) => {
                    if target.assoc.cascade.includes(CascadeOp::Persist) {
                        self.persist_node(core, target, None)?;
                    }
                    let target_key = target
                        .node
                        .read()
                        .expect("lock poisoned")
                        .key_value()
                        .ok_or_else(|| {
                            Error::Custom(format!(
                                "association '{}' references a transient instance and does not cascade persist",
                                target.assoc.name
                            ))
                        })?;
                    core.insert_join_row(&link, owner_key, &target_key)?;
                }
                Ownership::OwnerColumn { .. } => {}
            }
        }
        Ok(())
    }

    /// Persist one reachable instance, then recurse into its own
    /// associations. Revisits (by address while mid-walk, by key once
    /// assigned) are no-ops.
    fn persist_node(
        &mut self,
        core: &mut SessionCore,
        target: &CascadeTarget,
        parent_fk: Option<(&'static str, &Value)>,
    ) -> Result<()> {
        let addr = target.instance_addr();
        if self.visiting_addrs.contains(&addr) {
            return Ok(());
        }

        let existing_key = target.node.read().expect("lock poisoned").key_value();
        if let Some(key) = existing_key {
            let okey = ObjectKey::new(target.type_id, &key);
            if self.visited_keys.contains(&okey) {
                return Ok(());
            }
            // Already managed, or keyed by an earlier unit of work:
            // there is a row for it, so nothing to insert here.
            if core.tracker.state_of(&okey) == Some(ManagedState::Managed)
                || core.tracker.state_of(&okey).is_none()
            {
                self.visited_keys.insert(okey);
                return Ok(());
            }
            return Err(Error::Custom(format!(
                "association '{}' reaches an instance scheduled for removal",
                target.assoc.name
            )));
        }

        self.visiting_addrs.insert(addr);
        let result = self.persist_node_inner(core, target, parent_fk);
        self.visiting_addrs.remove(&addr);
        result
    }

    fn persist_node_inner(
        &mut self,
        core: &mut SessionCore,
        target: &CascadeTarget,
        parent_fk: Option<(&'static str, &Value)>,
    ) -> Result<()> {
        let child_targets = target
            .node
            .read()
            .expect("lock poisoned")
            .node_cascade_targets();

        self.cascade_before_insert(core, &child_targets)?;

        let key = {
            let mut node = target.node.write().expect("lock poisoned");
            let mut row = node.row_values();
            if let Some((column, parent_key)) = parent_fk {
                inject_fk(&mut row, column, parent_key);
            }
            let strategy = core
                .catalog
                .descriptor_for_type(target.type_id)
                .map_or_else(|| node.key_strategy(), |d| d.key_strategy);
            let key = core.insert_row(
                node.table_name(),
                node.key_column(),
                strategy,
                &node.sequence_name(),
                row,
            )?;
            node.assign_key(key.clone());
            key
        };

        let okey = ObjectKey::new(target.type_id, &key);
        self.visited_keys.insert(okey);
        tracing::debug!(
            association = target.assoc.name,
            key = %key,
            "cascade-persisted instance"
        );

        let (table, key_column, row) = {
            let node = target.node.read().expect("lock poisoned");
            (node.table_name(), node.key_column(), node.row_values())
        };
        let cell = (target.clone_cell)(&target.cell).ok_or_else(|| {
            Error::Custom("cascade target cell has unexpected type".into())
        })?;
        core.register_cell(
            okey,
            table,
            key_column,
            key.clone(),
            cell,
            target.instance_addr(),
            target.clone_cell,
            target.probe,
            target.target_associations,
            row,
        )?;

        self.cascade_after_insert(core, &key, &child_targets)
    }
}

/// Set the child's foreign key column to the parent key, adding the
/// column when the child type does not declare it as a field
/// (unidirectional associations).
fn inject_fk(row: &mut Vec<(&'static str, Value)>, column: &'static str, parent_key: &Value) {
    match row.iter_mut().find(|(name, _)| *name == column) {
        Some(slot) => {
            if slot.1.is_null() {
                slot.1 = parent_key.clone();
            }
        }
        None => row.push((column, parent_key.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_fk_fills_null_slot() {
        let mut row = vec![("id", Value::Null), ("team_id", Value::Null)];
        inject_fk(&mut row, "team_id", &Value::BigInt(7));
        assert_eq!(row[1].1, Value::BigInt(7));
    }

    #[test]
    fn inject_fk_keeps_existing_value() {
        let mut row = vec![("team_id", Value::BigInt(3))];
        inject_fk(&mut row, "team_id", &Value::BigInt(7));
        assert_eq!(row[0].1, Value::BigInt(3));
    }

    #[test]
    fn inject_fk_appends_missing_column() {
        let mut row = vec![("id", Value::Null)];
        inject_fk(&mut row, "owner_id", &Value::BigInt(7));
        assert_eq!(row.len(), 2);
        assert_eq!(row[1], ("owner_id", Value::BigInt(7)));
    }
}

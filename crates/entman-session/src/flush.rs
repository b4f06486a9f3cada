//! Flush: translate in-memory state changes into storage writes.
//!
//! Order within a flush: pending removals first (with their opt-in
//! cascade removals, children before owners), then updates computed by
//! diffing each managed instance's current row against its snapshot.
//! Inserts are not flushed here; they execute at `persist` time so
//! identity-generated keys exist for the identity map.
//!
//! Any storage failure propagates immediately; the caller aborts the
//! enclosing transaction, so no partial flush is ever committed.

use crate::identity_map::ObjectKey;
use crate::{SessionCore, sql};
use entman_core::{AssociationInfo, CascadeOp, ManagedState, Ownership, Result, Value};

/// Counts of work performed by one flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushReport {
    /// Rows deleted (owners only; cascade deletions are not counted).
    pub deleted: usize,
    /// Rows updated.
    pub updated: usize,
}

/// Run a full flush: removals, then updates.
pub(crate) fn flush(core: &mut SessionCore) -> Result<FlushReport> {
    let deleted = flush_removals(core)?;
    let updated = flush_updates(core)?;
    Ok(FlushReport { deleted, updated })
}

struct RemovalPlan {
    okey: ObjectKey,
    table: &'static str,
    key_column: &'static str,
    key: Value,
    associations: &'static [AssociationInfo],
    /// Current row values, for owner-side FK lookups.
    row: Option<Vec<(&'static str, Value)>>,
}

/// Physically delete every instance in the `Removed` state and drop it
/// from the identity map. Returns the number of owner rows deleted.
pub(crate) fn flush_removals(core: &mut SessionCore) -> Result<usize> {
    let mut plans: Vec<RemovalPlan> = Vec::new();
    for okey in core.tracker.removed_keys() {
        let Some(entry) = core.tracker.entry(&okey) else {
            continue;
        };
        let row = core
            .identity_map
            .get(&okey)
            .and_then(|cell| (entry.probe)(&cell));
        plans.push(RemovalPlan {
            okey,
            table: entry.table,
            key_column: entry.key_column,
            key: entry.key.clone(),
            associations: entry.associations,
            row,
        });
    }

    if !plans.is_empty() {
        core.begin_transaction()?;
    }
    let mut deleted = 0;
    for plan in &plans {
        cascade_remove(core, plan)?;
        let statement = sql::delete_sql(plan.table, plan.key_column);
        core.executor
            .execute(&statement, std::slice::from_ref(&plan.key))?;
        core.identity_map.remove(&plan.okey);
        core.tracker.remove(&plan.okey);
        tracing::debug!(table = plan.table, key = %plan.key, "deleted row");
        deleted += 1;
    }
    Ok(deleted)
}

/// Apply the per-association remove policy for one removed owner.
///
/// Cascade sets are per-operation: persist-only associations leave
/// their previously-persisted targets' rows intact. Link-table rows are
/// owned by the association itself and are cleaned up either way.
fn cascade_remove(core: &mut SessionCore, plan: &RemovalPlan) -> Result<()> {
    for assoc in plan.associations {
        match assoc.ownership {
            Ownership::JoinTable(link) => {
                if assoc.cascade.includes(CascadeOp::Remove) {
                    let keys_statement = sql::select_sql(
                        link.table,
                        &[link.target_column],
                        &[link.owner_column],
                        None,
                    );
                    let key_rows = core
                        .executor
                        .query(&keys_statement, std::slice::from_ref(&plan.key))?;
                    let keys: Vec<Value> = key_rows
                        .iter()
                        .filter_map(|row| row.get(0).cloned())
                        .collect();
                    core.executor.execute(
                        &sql::delete_sql(link.table, link.owner_column),
                        std::slice::from_ref(&plan.key),
                    )?;
                    if !keys.is_empty() {
                        core.executor.execute(
                            &sql::delete_in_sql(
                                assoc.target_table,
                                assoc.target_key_column,
                                keys.len(),
                            ),
                            &keys,
                        )?;
                        purge_by_keys(core, assoc.target_table, &keys);
                    }
                } else {
                    core.executor.execute(
                        &sql::delete_sql(link.table, link.owner_column),
                        std::slice::from_ref(&plan.key),
                    )?;
                }
            }
            Ownership::TargetColumn { column } => {
                if assoc.cascade.includes(CascadeOp::Remove) {
                    core.executor.execute(
                        &sql::delete_sql(assoc.target_table, column),
                        std::slice::from_ref(&plan.key),
                    )?;
                    purge_by_fk(core, assoc.target_table, column, &plan.key);
                }
            }
            Ownership::OwnerColumn { column } => {
                if assoc.cascade.includes(CascadeOp::Remove) {
                    let fk = plan
                        .row
                        .as_ref()
                        .and_then(|row| row.iter().find(|(name, _)| *name == column))
                        .map(|(_, value)| value.clone())
                        .filter(|value| !value.is_null());
                    if let Some(fk) = fk {
                        core.executor.execute(
                            &sql::delete_sql(assoc.target_table, assoc.target_key_column),
                            std::slice::from_ref(&fk),
                        )?;
                        purge_by_keys(core, assoc.target_table, std::slice::from_ref(&fk));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Drop identity entries for cascade-deleted target rows, matched by
/// key. Entries whose rows never exposed the key are left alone.
fn purge_by_keys(core: &mut SessionCore, table: &str, keys: &[Value]) {
    let mut stale: Vec<ObjectKey> = Vec::new();
    for (okey, entry) in core.tracker.iter() {
        if entry.table == table && keys.contains(&entry.key) {
            stale.push(*okey);
        }
    }
    purge(core, &stale);
}

/// Drop identity entries for cascade-deleted child rows, matched by the
/// foreign key column in their current row values. Children whose row
/// does not expose the column (unidirectional mappings) stay in the
/// map; their rows are gone from storage either way.
fn purge_by_fk(core: &mut SessionCore, table: &str, fk_column: &str, owner_key: &Value) {
    let mut stale: Vec<ObjectKey> = Vec::new();
    for (okey, entry) in core.tracker.iter() {
        if entry.table != table {
            continue;
        }
        let Some(cell) = core.identity_map.get(okey) else {
            continue;
        };
        let Some(row) = (entry.probe)(&cell) else {
            continue;
        };
        if row
            .iter()
            .any(|(name, value)| *name == fk_column && value == owner_key)
        {
            stale.push(*okey);
        }
    }
    purge(core, &stale);
}

fn purge(core: &mut SessionCore, keys: &[ObjectKey]) {
    for okey in keys {
        core.identity_map.remove(okey);
        core.tracker.remove(okey);
    }
}

struct UpdatePlan {
    okey: ObjectKey,
    table: &'static str,
    key_column: &'static str,
    key: Value,
    set_columns: Vec<&'static str>,
    set_values: Vec<Value>,
    new_row: Vec<(&'static str, Value)>,
}

/// Diff every managed instance against its snapshot and UPDATE the
/// changed columns. The snapshot is refreshed to the written state.
pub(crate) fn flush_updates(core: &mut SessionCore) -> Result<usize> {
    let mut plans: Vec<UpdatePlan> = Vec::new();
    for (okey, entry) in core.tracker.iter() {
        if entry.state != ManagedState::Managed {
            continue;
        }
        let Some(cell) = core.identity_map.get(okey) else {
            continue;
        };
        let Some(current) = (entry.probe)(&cell) else {
            continue;
        };
        if !core.tracker.is_dirty(okey, &current) {
            continue;
        }
        let set_columns: Vec<&'static str> = core
            .tracker
            .changed_columns(okey, &current)
            .into_iter()
            .filter(|column| *column != entry.key_column)
            .collect();
        if set_columns.is_empty() {
            continue;
        }
        let set_values: Vec<Value> = set_columns
            .iter()
            .map(|column| {
                current
                    .iter()
                    .find(|(name, _)| name == column)
                    .map_or(Value::Null, |(_, value)| value.clone())
            })
            .collect();
        plans.push(UpdatePlan {
            okey: *okey,
            table: entry.table,
            key_column: entry.key_column,
            key: entry.key.clone(),
            set_columns,
            set_values,
            new_row: current,
        });
    }

    if !plans.is_empty() {
        core.begin_transaction()?;
    }
    let mut updated = 0;
    for plan in plans {
        let statement = sql::update_sql(plan.table, &plan.set_columns, plan.key_column);
        let mut params = plan.set_values;
        params.push(plan.key.clone());
        core.executor.execute(&statement, &params)?;
        core.tracker.snapshot(&plan.okey, &plan.new_row);
        tracing::debug!(
            table = plan.table,
            key = %plan.key,
            columns = ?plan.set_columns,
            "updated row"
        );
        updated += 1;
    }
    Ok(updated)
}

//! In-memory storage engine for entman.
//!
//! [`MemoryExecutor`] implements the `SqlExecutor` contract over plain
//! in-memory tables. It interprets exactly the parameterized statement
//! shapes the session layer emits (CREATE TABLE, INSERT, SELECT with
//! `=`/`IN` filters and optional ORDER BY, UPDATE, DELETE) and rejects
//! anything else with a syntax error. Transactions are snapshots:
//! `begin` clones the tables, `rollback` restores them.
//!
//! Identity keys are assigned from a per-table counter whenever an
//! insert leaves the primary key column absent or NULL; named sequences
//! back the `Sequence` strategy.

mod statement;

use entman_core::{Row, SqlExecutor, StorageError, StorageErrorKind, Value};
use statement::{Filter, Statement};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    key_column: Option<String>,
    rows: Vec<Vec<Value>>,
    next_key: i64,
}

impl Table {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Add a column on demand. Session-generated FK columns normally
    /// arrive via DDL, but tolerating late columns keeps ad-hoc test
    /// setups simple.
    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }
}

#[derive(Debug, Clone, Default)]
struct Dataset {
    tables: HashMap<String, Table>,
    sequences: HashMap<String, i64>,
}

/// An in-memory `SqlExecutor`.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    data: Dataset,
    snapshot: Option<Dataset>,
    last_insert_id: Option<i64>,
}

impl MemoryExecutor {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine and run the given DDL statements.
    pub fn with_schema<S: AsRef<str>>(ddl: &[S]) -> Result<Self, StorageError> {
        let mut executor = Self::new();
        for statement in ddl {
            executor.execute(statement.as_ref(), &[])?;
        }
        Ok(executor)
    }

    /// Number of rows currently stored in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.data.tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StorageError> {
        self.data
            .tables
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(format!("no such table '{name}'")))
    }

    fn table(&self, name: &str) -> Result<&Table, StorageError> {
        self.data
            .tables
            .get(name)
            .ok_or_else(|| StorageError::not_found(format!("no such table '{name}'")))
    }

    fn resolve_params(
        filter: &Filter,
        params: &[Value],
    ) -> Result<ResolvedFilter, StorageError> {
        let fetch = |index: usize| -> Result<Value, StorageError> {
            params.get(index - 1).cloned().ok_or_else(|| {
                StorageError::new(
                    StorageErrorKind::Other,
                    format!("missing parameter ${index}"),
                )
            })
        };
        match filter {
            Filter::All => Ok(ResolvedFilter::All),
            Filter::Equals(pairs) => {
                let mut resolved = Vec::with_capacity(pairs.len());
                for (column, index) in pairs {
                    resolved.push((column.clone(), fetch(*index)?));
                }
                Ok(ResolvedFilter::Equals(resolved))
            }
            Filter::In(column, indices) => {
                let mut values = Vec::with_capacity(indices.len());
                for index in indices {
                    values.push(fetch(*index)?);
                }
                Ok(ResolvedFilter::In(column.clone(), values))
            }
        }
    }

    fn matching_rows(table: &Table, filter: &ResolvedFilter) -> Vec<usize> {
        (0..table.rows.len())
            .filter(|&i| filter.matches(table, &table.rows[i]))
            .collect()
    }
}

enum ResolvedFilter {
    All,
    Equals(Vec<(String, Value)>),
    In(String, Vec<Value>),
}

impl ResolvedFilter {
    fn matches(&self, table: &Table, row: &[Value]) -> bool {
        match self {
            ResolvedFilter::All => true,
            ResolvedFilter::Equals(pairs) => pairs.iter().all(|(column, value)| {
                table
                    .column_index(column)
                    .is_some_and(|i| row.get(i) == Some(value))
            }),
            ResolvedFilter::In(column, values) => table
                .column_index(column)
                .is_some_and(|i| row.get(i).is_some_and(|v| values.contains(v))),
        }
    }
}

impl SqlExecutor for MemoryExecutor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        match statement::parse(sql)? {
            Statement::CreateTable {
                table,
                columns,
                key_column,
            } => {
                if self.data.tables.contains_key(&table) {
                    return Err(StorageError::new(
                        StorageErrorKind::Other,
                        format!("table '{table}' already exists"),
                    ));
                }
                tracing::debug!(table = %table, columns = columns.len(), "created table");
                self.data.tables.insert(
                    table,
                    Table {
                        columns,
                        key_column,
                        rows: Vec::new(),
                        next_key: 1,
                    },
                );
                Ok(0)
            }
            Statement::Insert { table, columns } => {
                if columns.len() != params.len() {
                    return Err(StorageError::new(
                        StorageErrorKind::Other,
                        format!(
                            "expected {} parameters, got {}",
                            columns.len(),
                            params.len()
                        ),
                    )
                    .with_sql(sql));
                }
                let table_ref = self.table_mut(&table)?;
                let mut row = vec![Value::Null; table_ref.columns.len()];
                for (column, value) in columns.iter().zip(params) {
                    let index = table_ref.ensure_column(column);
                    if row.len() < table_ref.columns.len() {
                        row.resize(table_ref.columns.len(), Value::Null);
                    }
                    row[index] = value.clone();
                }
                // Identity key assignment when the key is absent or NULL.
                let mut assigned = None;
                if let Some(key_column) = table_ref.key_column.clone() {
                    let index = table_ref
                        .column_index(&key_column)
                        .unwrap_or_else(|| table_ref.ensure_column(&key_column));
                    if row.len() < table_ref.columns.len() {
                        row.resize(table_ref.columns.len(), Value::Null);
                    }
                    match &row[index] {
                        Value::Null => {
                            let key = table_ref.next_key;
                            table_ref.next_key += 1;
                            row[index] = Value::BigInt(key);
                            assigned = Some(key);
                        }
                        existing => {
                            let duplicate = table_ref
                                .rows
                                .iter()
                                .any(|r| r.get(index) == Some(existing));
                            if duplicate {
                                return Err(StorageError::new(
                                    StorageErrorKind::Constraint,
                                    format!(
                                        "duplicate key {existing} in table '{table}'"
                                    ),
                                ));
                            }
                            if let Some(preset) = existing.as_i64() {
                                table_ref.next_key = table_ref.next_key.max(preset + 1);
                            }
                        }
                    }
                }
                table_ref.rows.push(row);
                if let Some(key) = assigned {
                    self.last_insert_id = Some(key);
                }
                Ok(1)
            }
            Statement::Update {
                table,
                set_columns,
                filter,
            } => {
                let resolved = Self::resolve_params(&filter, params)?;
                let table_ref = self.table_mut(&table)?;
                let indices = Self::matching_rows(table_ref, &resolved);
                let mut affected = 0;
                for row_index in indices {
                    for (column, param_index) in &set_columns {
                        let value = params.get(param_index - 1).cloned().ok_or_else(|| {
                            StorageError::new(
                                StorageErrorKind::Other,
                                format!("missing parameter ${param_index}"),
                            )
                        })?;
                        let column_index = table_ref.ensure_column(column);
                        let row = &mut table_ref.rows[row_index];
                        if row.len() < table_ref.columns.len() {
                            row.resize(table_ref.columns.len(), Value::Null);
                        }
                        row[column_index] = value;
                    }
                    affected += 1;
                }
                Ok(affected)
            }
            Statement::Delete { table, filter } => {
                let resolved = Self::resolve_params(&filter, params)?;
                let table_ref = self.table_mut(&table)?;
                let matching: std::collections::HashSet<usize> =
                    Self::matching_rows(table_ref, &resolved).into_iter().collect();
                let mut index = 0;
                table_ref.rows.retain(|_| {
                    let keep = !matching.contains(&index);
                    index += 1;
                    keep
                });
                Ok(matching.len() as u64)
            }
            Statement::Select { .. } => Err(StorageError::new(
                StorageErrorKind::Other,
                "SELECT must go through query()",
            )
            .with_sql(sql)),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        let Statement::Select {
            table,
            columns,
            filter,
            order_by,
        } = statement::parse(sql)?
        else {
            return Err(StorageError::syntax("query() only accepts SELECT").with_sql(sql));
        };
        let resolved = Self::resolve_params(&filter, params)?;
        let table_ref = self.table(&table)?;
        let mut indices = Self::matching_rows(table_ref, &resolved);

        if let Some((column, descending)) = &order_by {
            let column_index = table_ref.column_index(column).ok_or_else(|| {
                StorageError::not_found(format!("no such column '{column}' in '{table}'"))
            })?;
            indices.sort_by(|&a, &b| {
                let left = &table_ref.rows[a][column_index];
                let right = &table_ref.rows[b][column_index];
                let ordering = compare_values(left, right);
                if *descending { ordering.reverse() } else { ordering }
            });
        }

        let mut out = Vec::with_capacity(indices.len());
        let shared_columns = std::sync::Arc::new(entman_core::ColumnInfo::new(columns.clone()));
        for row_index in indices {
            let row = &table_ref.rows[row_index];
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = table_ref
                    .column_index(column)
                    .and_then(|i| row.get(i).cloned())
                    .unwrap_or(Value::Null);
                values.push(value);
            }
            out.push(Row::with_columns(std::sync::Arc::clone(&shared_columns), values));
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.snapshot.is_some() {
            return Err(StorageError::transaction("transaction already active"));
        }
        self.snapshot = Some(self.data.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StorageError::transaction("no active transaction"))
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.data = snapshot;
                Ok(())
            }
            None => Err(StorageError::transaction("no active transaction")),
        }
    }

    fn last_insert_id(&mut self) -> Result<i64, StorageError> {
        self.last_insert_id
            .ok_or_else(|| StorageError::new(StorageErrorKind::Other, "no identity insert yet"))
    }

    fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, StorageError> {
        let counter = self
            .data
            .sequences
            .entry(sequence.to_string())
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Cloneable handle sharing one [`MemoryExecutor`] across sessions.
///
/// Sessions own their executor, so concurrent-session scenarios (one
/// unit of work writes, a later one reads) need a shared engine behind
/// the handles. Transactions are engine-wide; run units of work one at
/// a time.
#[derive(Clone, Default)]
pub struct SharedMemory {
    inner: std::sync::Arc<std::sync::Mutex<MemoryExecutor>>,
}

impl SharedMemory {
    /// Create an empty shared engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared engine and run the given DDL statements.
    pub fn with_schema<S: AsRef<str>>(ddl: &[S]) -> Result<Self, StorageError> {
        Ok(Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new(MemoryExecutor::with_schema(ddl)?)),
        })
    }

    /// Number of rows currently stored in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.inner.lock().expect("lock poisoned").row_count(table)
    }
}

impl SqlExecutor for SharedMemory {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        self.inner.lock().expect("lock poisoned").execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.inner.lock().expect("lock poisoned").query(sql, params)
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        self.inner.lock().expect("lock poisoned").begin()
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.inner.lock().expect("lock poisoned").commit()
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.inner.lock().expect("lock poisoned").rollback()
    }

    fn last_insert_id(&mut self) -> Result<i64, StorageError> {
        self.inner.lock().expect("lock poisoned").last_insert_id()
    }

    fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, StorageError> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .next_sequence_value(sequence)
    }
}

fn compare_values(left: &Value, right: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) => return a.cmp(&b),
        _ => {}
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => return a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => {}
    }
    match (left.as_str(), right.as_str()) {
        (Some(a), Some(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> MemoryExecutor {
        MemoryExecutor::with_schema(&[
            "CREATE TABLE \"hero\" (\"id\" BIGINT PRIMARY KEY, \"name\" TEXT NOT NULL, \"team_id\" BIGINT)",
        ])
        .unwrap()
    }

    fn insert_hero(executor: &mut MemoryExecutor, name: &str, team: Option<i64>) -> i64 {
        executor
            .execute(
                "INSERT INTO \"hero\" (\"name\", \"team_id\") VALUES ($1, $2)",
                &[Value::Text(name.into()), Value::from(team)],
            )
            .unwrap();
        executor.last_insert_id().unwrap()
    }

    #[test]
    fn identity_keys_count_up() {
        let mut executor = executor();
        assert_eq!(insert_hero(&mut executor, "a", None), 1);
        assert_eq!(insert_hero(&mut executor, "b", None), 2);
        assert_eq!(executor.row_count("hero"), 2);
    }

    #[test]
    fn preset_key_bumps_counter_and_rejects_duplicates() {
        let mut executor = executor();
        executor
            .execute(
                "INSERT INTO \"hero\" (\"id\", \"name\") VALUES ($1, $2)",
                &[Value::BigInt(10), Value::Text("x".into())],
            )
            .unwrap();
        assert_eq!(insert_hero(&mut executor, "y", None), 11);

        let err = executor
            .execute(
                "INSERT INTO \"hero\" (\"id\", \"name\") VALUES ($1, $2)",
                &[Value::BigInt(10), Value::Text("z".into())],
            )
            .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::Constraint);
    }

    #[test]
    fn select_with_filter_and_order() {
        let mut executor = executor();
        insert_hero(&mut executor, "bravo", Some(1));
        insert_hero(&mut executor, "alpha", Some(1));
        insert_hero(&mut executor, "other", Some(2));

        let rows = executor
            .query(
                "SELECT \"id\", \"name\" FROM \"hero\" WHERE \"team_id\" = $1 ORDER BY \"name\"",
                &[Value::BigInt(1)],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("alpha".into())));
        assert_eq!(rows[1].get_by_name("name"), Some(&Value::Text("bravo".into())));
    }

    #[test]
    fn select_in_filter() {
        let mut executor = executor();
        let a = insert_hero(&mut executor, "a", None);
        let _b = insert_hero(&mut executor, "b", None);
        let c = insert_hero(&mut executor, "c", None);

        let rows = executor
            .query(
                "SELECT \"id\" FROM \"hero\" WHERE \"id\" IN ($1, $2)",
                &[Value::BigInt(a), Value::BigInt(c)],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn update_and_delete() {
        let mut executor = executor();
        let id = insert_hero(&mut executor, "old", None);

        let affected = executor
            .execute(
                "UPDATE \"hero\" SET \"name\" = $1 WHERE \"id\" = $2",
                &[Value::Text("new".into()), Value::BigInt(id)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = executor
            .query(
                "SELECT \"name\" FROM \"hero\" WHERE \"id\" = $1",
                &[Value::BigInt(id)],
            )
            .unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Text("new".into())));

        let deleted = executor
            .execute("DELETE FROM \"hero\" WHERE \"id\" = $1", &[Value::BigInt(id)])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(executor.row_count("hero"), 0);
    }

    #[test]
    fn rollback_restores_tables_and_sequences() {
        let mut executor = executor();
        insert_hero(&mut executor, "kept", None);

        executor.begin().unwrap();
        insert_hero(&mut executor, "discarded", None);
        assert_eq!(executor.next_sequence_value("hero_seq").unwrap(), 1);
        assert_eq!(executor.row_count("hero"), 2);
        executor.rollback().unwrap();

        assert_eq!(executor.row_count("hero"), 1);
        assert_eq!(executor.next_sequence_value("hero_seq").unwrap(), 1);
    }

    #[test]
    fn commit_keeps_changes() {
        let mut executor = executor();
        executor.begin().unwrap();
        insert_hero(&mut executor, "kept", None);
        executor.commit().unwrap();
        assert_eq!(executor.row_count("hero"), 1);
    }

    #[test]
    fn transaction_state_errors() {
        let mut executor = executor();
        assert!(executor.commit().is_err());
        assert!(executor.rollback().is_err());
        executor.begin().unwrap();
        assert!(executor.begin().is_err());
    }

    #[test]
    fn sequences_are_independent_and_monotonic() {
        let mut executor = executor();
        assert_eq!(executor.next_sequence_value("a_seq").unwrap(), 1);
        assert_eq!(executor.next_sequence_value("a_seq").unwrap(), 2);
        assert_eq!(executor.next_sequence_value("b_seq").unwrap(), 1);
    }

    #[test]
    fn unknown_table_is_not_found() {
        let mut executor = MemoryExecutor::new();
        let err = executor
            .query("SELECT \"id\" FROM \"ghost\"", &[])
            .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::NotFound);
    }

    #[test]
    fn unsupported_statement_is_syntax_error() {
        let mut executor = executor();
        let err = executor.execute("VACUUM", &[]).unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::Syntax);
    }
}

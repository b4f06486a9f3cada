//! SQL statement builders for the statements the session emits.
//!
//! Identifiers are always double-quoted and parameters use `$n`
//! placeholders; the storage engine behind `SqlExecutor` is expected to
//! understand exactly these shapes.

fn quoted(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| format!("\"{c}\"")).collect()
}

fn placeholders(start: usize, count: usize) -> Vec<String> {
    (start..start + count).map(|i| format!("${i}")).collect()
}

/// `SELECT "a", "b" FROM "t" [WHERE "c" = $1] [ORDER BY "o" [DESC]]`
pub(crate) fn select_sql(
    table: &str,
    columns: &[&str],
    filter_columns: &[&str],
    order_by: Option<(&str, bool)>,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM \"{table}\"",
        quoted(columns).join(", ")
    );
    if !filter_columns.is_empty() {
        let predicates: Vec<String> = filter_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("\"{c}\" = ${}", i + 1))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }
    if let Some((column, descending)) = order_by {
        sql.push_str(&format!(" ORDER BY \"{column}\""));
        if descending {
            sql.push_str(" DESC");
        }
    }
    sql
}

/// `SELECT "a", "b" FROM "t" WHERE "k" IN ($1, $2, ...)`
pub(crate) fn select_in_sql(table: &str, columns: &[&str], key_column: &str, count: usize) -> String {
    format!(
        "SELECT {} FROM \"{table}\" WHERE \"{key_column}\" IN ({})",
        quoted(columns).join(", "),
        placeholders(1, count).join(", ")
    )
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2)`
pub(crate) fn insert_sql(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        quoted(columns).join(", "),
        placeholders(1, columns.len()).join(", ")
    )
}

/// `UPDATE "t" SET "a" = $1, "b" = $2 WHERE "k" = $3`
pub(crate) fn update_sql(table: &str, set_columns: &[&str], key_column: &str) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("\"{c}\" = ${}", i + 1))
        .collect();
    format!(
        "UPDATE \"{table}\" SET {} WHERE \"{key_column}\" = ${}",
        assignments.join(", "),
        set_columns.len() + 1
    )
}

/// `DELETE FROM "t" WHERE "k" = $1`
pub(crate) fn delete_sql(table: &str, key_column: &str) -> String {
    format!("DELETE FROM \"{table}\" WHERE \"{key_column}\" = $1")
}

/// `DELETE FROM "t" WHERE "k" IN ($1, $2, ...)`
pub(crate) fn delete_in_sql(table: &str, key_column: &str, count: usize) -> String {
    format!(
        "DELETE FROM \"{table}\" WHERE \"{key_column}\" IN ({})",
        placeholders(1, count).join(", ")
    )
}

//! Parser for the statement shapes the session layer emits.
//!
//! Identifiers are always double-quoted and parameters are `$n`
//! references; values never appear in the statement text. Anything
//! outside the supported grammar is a syntax error.

use entman_core::StorageError;

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    CreateTable {
        table: String,
        columns: Vec<String>,
        key_column: Option<String>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
    },
    Select {
        table: String,
        columns: Vec<String>,
        filter: Filter,
        order_by: Option<(String, bool)>,
    },
    Update {
        table: String,
        set_columns: Vec<(String, usize)>,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
}

/// A parsed WHERE clause; parameter slots are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Filter {
    All,
    Equals(Vec<(String, usize)>),
    In(String, Vec<usize>),
}

fn syntax(sql: &str, message: impl Into<String>) -> StorageError {
    StorageError::syntax(message).with_sql(sql)
}

/// Parse `"name"` at the start of `input`, returning the name and the
/// remainder.
fn quoted_ident<'a>(sql: &str, input: &'a str) -> Result<(String, &'a str), StorageError> {
    let input = input.trim_start();
    let rest = input
        .strip_prefix('"')
        .ok_or_else(|| syntax(sql, "expected quoted identifier"))?;
    let end = rest
        .find('"')
        .ok_or_else(|| syntax(sql, "unterminated identifier"))?;
    Ok((rest[..end].to_string(), &rest[end + 1..]))
}

/// Parse `$n` at the start of `input`.
fn param<'a>(sql: &str, input: &'a str) -> Result<(usize, &'a str), StorageError> {
    let input = input.trim_start();
    let rest = input
        .strip_prefix('$')
        .ok_or_else(|| syntax(sql, "expected parameter"))?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(syntax(sql, "expected parameter number"));
    }
    let index: usize = digits
        .parse()
        .map_err(|_| syntax(sql, "parameter number out of range"))?;
    if index == 0 {
        return Err(syntax(sql, "parameters are 1-based"));
    }
    Ok((index, &rest[digits.len()..]))
}

/// Parse a parenthesized comma-separated list with the given item
/// parser; returns the items and the remainder after `)`.
fn paren_list<'a, T>(
    sql: &str,
    input: &'a str,
    mut item: impl FnMut(&str, &'a str) -> Result<(T, &'a str), StorageError>,
) -> Result<(Vec<T>, &'a str), StorageError> {
    let input = input.trim_start();
    let mut rest = input
        .strip_prefix('(')
        .ok_or_else(|| syntax(sql, "expected '('"))?;
    let mut items = Vec::new();
    loop {
        let (value, after) = item(sql, rest)?;
        items.push(value);
        let after = after.trim_start();
        if let Some(after) = after.strip_prefix(',') {
            rest = after;
        } else if let Some(after) = after.strip_prefix(')') {
            return Ok((items, after));
        } else {
            return Err(syntax(sql, "expected ',' or ')'"));
        }
    }
}

fn parse_filter(sql: &str, clause: &str) -> Result<Filter, StorageError> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Ok(Filter::All);
    }
    if clause.contains(" IN ") {
        let (column, rest) = quoted_ident(sql, clause)?;
        let rest = rest
            .trim_start()
            .strip_prefix("IN")
            .ok_or_else(|| syntax(sql, "expected IN"))?;
        let (indices, rest) = paren_list(sql, rest, param)?;
        if !rest.trim().is_empty() {
            return Err(syntax(sql, "trailing input after IN list"));
        }
        return Ok(Filter::In(column, indices));
    }
    let mut pairs = Vec::new();
    for predicate in clause.split(" AND ") {
        let (column, rest) = quoted_ident(sql, predicate)?;
        let rest = rest
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| syntax(sql, "expected '='"))?;
        let (index, rest) = param(sql, rest)?;
        if !rest.trim().is_empty() {
            return Err(syntax(sql, "trailing input in predicate"));
        }
        pairs.push((column, index));
    }
    Ok(Filter::Equals(pairs))
}

fn parse_create(sql: &str, rest: &str) -> Result<Statement, StorageError> {
    let (table, rest) = quoted_ident(sql, rest)?;
    let rest = rest.trim();
    let body = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| syntax(sql, "expected column list"))?;

    let mut columns = Vec::new();
    let mut key_column = None;
    for definition in body.split(',') {
        let (column, attributes) = quoted_ident(sql, definition)?;
        if attributes.contains("PRIMARY KEY") {
            key_column = Some(column.clone());
        }
        columns.push(column);
    }
    Ok(Statement::CreateTable {
        table,
        columns,
        key_column,
    })
}

fn parse_insert(sql: &str, rest: &str) -> Result<Statement, StorageError> {
    let (table, rest) = quoted_ident(sql, rest)?;
    let (columns, rest) = paren_list(sql, rest, quoted_ident)?;
    let rest = rest
        .trim_start()
        .strip_prefix("VALUES")
        .ok_or_else(|| syntax(sql, "expected VALUES"))?;
    let (params, rest) = paren_list(sql, rest, param)?;
    if !rest.trim().is_empty() {
        return Err(syntax(sql, "trailing input after VALUES"));
    }
    if params.len() != columns.len() {
        return Err(syntax(sql, "column/parameter count mismatch"));
    }
    Ok(Statement::Insert { table, columns })
}

fn parse_select(sql: &str, rest: &str) -> Result<Statement, StorageError> {
    let from = rest
        .find(" FROM ")
        .ok_or_else(|| syntax(sql, "expected FROM"))?;
    let projection = &rest[..from];
    let mut columns = Vec::new();
    for part in projection.split(',') {
        let (column, after) = quoted_ident(sql, part)?;
        if !after.trim().is_empty() {
            return Err(syntax(sql, "unsupported projection"));
        }
        columns.push(column);
    }

    let rest = &rest[from + " FROM ".len()..];
    let (table, rest) = quoted_ident(sql, rest)?;
    let rest = rest.trim();

    let (clause, order_text) = match rest.find("ORDER BY ") {
        Some(position) => (&rest[..position], Some(&rest[position + "ORDER BY ".len()..])),
        None => (rest, None),
    };
    let order_by = match order_text {
        None => None,
        Some(text) => {
            let (column, after) = quoted_ident(sql, text)?;
            let after = after.trim();
            let descending = match after {
                "" => false,
                "DESC" => true,
                _ => return Err(syntax(sql, "unsupported ORDER BY")),
            };
            Some((column, descending))
        }
    };

    let clause = clause.trim();
    let filter = match clause.strip_prefix("WHERE ") {
        Some(predicates) => parse_filter(sql, predicates)?,
        None if clause.is_empty() => Filter::All,
        None => return Err(syntax(sql, "unsupported clause")),
    };

    Ok(Statement::Select {
        table,
        columns,
        filter,
        order_by,
    })
}

fn parse_update(sql: &str, rest: &str) -> Result<Statement, StorageError> {
    let (table, rest) = quoted_ident(sql, rest)?;
    let rest = rest
        .trim_start()
        .strip_prefix("SET ")
        .ok_or_else(|| syntax(sql, "expected SET"))?;

    let (assignments_text, clause) = match rest.find(" WHERE ") {
        Some(position) => (&rest[..position], &rest[position + " WHERE ".len()..]),
        None => (rest, ""),
    };

    let mut set_columns = Vec::new();
    for assignment in assignments_text.split(',') {
        let (column, after) = quoted_ident(sql, assignment)?;
        let after = after
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| syntax(sql, "expected '='"))?;
        let (index, after) = param(sql, after)?;
        if !after.trim().is_empty() {
            return Err(syntax(sql, "trailing input in assignment"));
        }
        set_columns.push((column, index));
    }

    Ok(Statement::Update {
        table,
        set_columns,
        filter: parse_filter(sql, clause)?,
    })
}

fn parse_delete(sql: &str, rest: &str) -> Result<Statement, StorageError> {
    let (table, rest) = quoted_ident(sql, rest)?;
    let rest = rest.trim();
    let filter = match rest.strip_prefix("WHERE ") {
        Some(clause) => parse_filter(sql, clause)?,
        None if rest.is_empty() => Filter::All,
        None => return Err(syntax(sql, "unsupported clause")),
    };
    Ok(Statement::Delete { table, filter })
}

/// Parse one statement.
pub(crate) fn parse(sql: &str) -> Result<Statement, StorageError> {
    let trimmed = sql.trim();
    if let Some(rest) = trimmed.strip_prefix("CREATE TABLE ") {
        parse_create(sql, rest)
    } else if let Some(rest) = trimmed.strip_prefix("INSERT INTO ") {
        parse_insert(sql, rest)
    } else if let Some(rest) = trimmed.strip_prefix("SELECT ") {
        parse_select(sql, rest)
    } else if let Some(rest) = trimmed.strip_prefix("UPDATE ") {
        parse_update(sql, rest)
    } else if let Some(rest) = trimmed.strip_prefix("DELETE FROM ") {
        parse_delete(sql, rest)
    } else {
        Err(syntax(sql, "unsupported statement"))
    }
}

// src/records.rs
// Read and prune key/value records inside a product's embedded SQLite file.

use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{from_target_sqlite, ResetError, Result};
use crate::types::RecordTable;

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// A matched text cell: table, column and the exact value it holds.
pub type Cell = (String, String, String);

// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn has_sqlite_header(path: &Path) -> std::io::Result<bool> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn quote_ident(ident: &str) -> Result<String> {
    let valid = !ident.is_empty()
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ResetError::InvalidOptions(format!(
            "'{ident}' is not a valid table or column name"
        )));
    }
    Ok(format!("\"{ident}\""))
}

fn open(path: &Path, flags: OpenFlags, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Keys in `records.table` matching any of the `LIKE` patterns, sorted and
/// de-duplicated. Opens the file read-only.
pub fn matching_keys(
    path: &Path,
    records: &RecordTable,
    busy_timeout: Duration,
) -> rusqlite::Result<Vec<String>> {
    let conn = open(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        busy_timeout,
    )?;
    let (table, column) = match (quote_ident(&records.table), quote_ident(&records.key_column)) {
        (Ok(t), Ok(c)) => (t, c),
        _ => return Err(rusqlite::Error::InvalidQuery),
    };

    // A database without the table simply has nothing to match.
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![records.table],
        |row| row.get(0),
    )?;
    if !has_table {
        debug!("{} has no table {}", path.display(), records.table);
        return Ok(Vec::new());
    }

    let sql = format!("SELECT {column} FROM {table} WHERE {column} LIKE ?1 ESCAPE '\\'");
    let mut stmt = conn.prepare(&sql)?;
    let mut keys = BTreeSet::new();
    for pattern in &records.key_patterns {
        let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
        for key in rows {
            keys.insert(key?);
        }
    }
    Ok(keys.into_iter().collect())
}

/// Deletes exactly the listed keys in one IMMEDIATE transaction. Returns the
/// keys that were actually present.
pub fn delete_keys(
    path: &Path,
    records: &RecordTable,
    keys: &[String],
    busy_timeout: Duration,
) -> Result<Vec<String>> {
    let table = quote_ident(&records.table)?;
    let column = quote_ident(&records.key_column)?;
    let mut conn = open(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        busy_timeout,
    )
    .map_err(|e| from_target_sqlite(path, e))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| from_target_sqlite(path, e))?;
    let mut deleted = Vec::new();
    {
        let sql = format!("DELETE FROM {table} WHERE {column} = ?1");
        let mut stmt = tx.prepare(&sql).map_err(|e| from_target_sqlite(path, e))?;
        for key in keys {
            let n = stmt.execute(params![key]).map_err(|e| from_target_sqlite(path, e))?;
            if n > 0 {
                deleted.push(key.clone());
            }
        }
    }
    tx.commit().map_err(|e| from_target_sqlite(path, e))?;
    debug!("Deleted {}/{} records from {}", deleted.len(), keys.len(), path.display());
    Ok(deleted)
}

// --- Schema-agnostic matching ---

fn user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let tables = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tables)
}

fn text_columns(conn: &Connection, quoted_table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted_table})"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
    let mut columns = Vec::new();
    for row in rows {
        let (name, declared) = row?;
        let declared = declared.to_ascii_uppercase();
        if declared.contains("TEXT") || declared.contains("CHAR") || declared.contains("CLOB") {
            columns.push(name);
        }
    }
    Ok(columns)
}

/// Text cells in any table whose value matches one of `patterns`. Used for
/// databases whose schema is not known in advance. Tables or columns with
/// unusual names are skipped.
pub fn matching_cells(path: &Path, patterns: &[String], busy_timeout: Duration) -> rusqlite::Result<Vec<Cell>> {
    let conn = open(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        busy_timeout,
    )?;
    let mut cells = BTreeSet::new();
    for table in user_tables(&conn)? {
        let Ok(quoted_table) = quote_ident(&table) else {
            debug!("Skipping table {:?} in {}", table, path.display());
            continue;
        };
        for column in text_columns(&conn, &quoted_table)? {
            let Ok(quoted_column) = quote_ident(&column) else { continue };
            let sql = format!(
                "SELECT DISTINCT {quoted_column} FROM {quoted_table} \
                 WHERE typeof({quoted_column}) = 'text' AND {quoted_column} LIKE ?1 ESCAPE '\\'"
            );
            let mut stmt = conn.prepare(&sql)?;
            for pattern in patterns {
                let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
                for value in rows {
                    cells.insert((table.clone(), column.clone(), value?));
                }
            }
        }
    }
    Ok(cells.into_iter().collect())
}

/// Deletes the rows holding exactly the listed cells in one IMMEDIATE
/// transaction. Returns the cells whose rows were still there.
pub fn delete_cells(path: &Path, cells: &[Cell], busy_timeout: Duration) -> Result<Vec<Cell>> {
    let mut conn = open(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        busy_timeout,
    )
    .map_err(|e| from_target_sqlite(path, e))?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| from_target_sqlite(path, e))?;
    let mut deleted = Vec::new();
    for cell in cells {
        let (table, column, value) = cell;
        let sql = format!("DELETE FROM {} WHERE {} = ?1", quote_ident(table)?, quote_ident(column)?);
        let n = tx
            .execute(&sql, params![value])
            .map_err(|e| from_target_sqlite(path, e))?;
        if n > 0 {
            deleted.push(cell.clone());
        }
    }
    tx.commit().map_err(|e| from_target_sqlite(path, e))?;
    debug!("Deleted rows for {}/{} cells in {}", deleted.len(), cells.len(), path.display());
    Ok(deleted)
}

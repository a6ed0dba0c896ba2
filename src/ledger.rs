// src/ledger.rs
// Record of identifier values this tool has written, so a later scan does not
// flag them as "old" again.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;

/// Hash of (artifact path, field, value). Values themselves are never stored.
pub fn fingerprint(path: &Path, field: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(field.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn load_issued(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT fingerprint FROM issued_ids")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut set = HashSet::new();
    for row in rows {
        set.insert(row?);
    }
    Ok(set)
}

pub fn record_issued(tx: &Transaction, path: &Path, issued: &[(String, String)]) -> Result<()> {
    let now = Utc::now();
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO issued_ids (fingerprint, path, field, issued_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(fingerprint) DO UPDATE SET issued_at = excluded.issued_at
        "#,
    )?;
    let path_str = path.to_string_lossy().to_string();
    for (field, value) in issued {
        stmt.execute(params![fingerprint(path, field, value), path_str, field, now])?;
    }
    Ok(())
}

/// Drops rows for `path` issued at or after `since`, i.e. values written
/// after the restored backup was taken.
pub fn forget_issued_since(conn: &Connection, path: &Path, since: DateTime<Utc>) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT fingerprint, issued_at FROM issued_ids WHERE path = ?1")?;
    let rows = stmt.query_map(params![path.to_string_lossy().to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, DateTime<Utc>>(1)?))
    })?;
    let mut stale = Vec::new();
    for row in rows {
        let (fingerprint, issued_at) = row?;
        if issued_at >= since {
            stale.push(fingerprint);
        }
    }
    let mut removed = 0;
    for fingerprint in stale {
        removed += conn.execute("DELETE FROM issued_ids WHERE fingerprint = ?1", params![fingerprint])?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE issued_ids (fingerprint TEXT PRIMARY KEY NOT NULL, path TEXT NOT NULL, field TEXT NOT NULL, issued_at TEXT NOT NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn recorded_values_are_found_and_forgotten() {
        let mut conn = conn();
        let path = PathBuf::from("/tmp/storage.json");
        let tx = conn.transaction().unwrap();
        record_issued(&tx, &path, &[("telemetry.machineId".into(), "abc".into())]).unwrap();
        tx.commit().unwrap();

        let issued = load_issued(&conn).unwrap();
        assert!(issued.contains(&fingerprint(&path, "telemetry.machineId", "abc")));
        assert!(!issued.contains(&fingerprint(&path, "telemetry.machineId", "abd")));

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(forget_issued_since(&conn, &path, later).unwrap(), 0);
        assert_eq!(forget_issued_since(&conn, &path, Utc::now() - chrono::Duration::seconds(60)).unwrap(), 1);
        assert!(load_issued(&conn).unwrap().is_empty());
    }
}

//! Dumps tables as plain SQL `INSERT` statements for loading into a hosted
//! Postgres instance by hand.

use std::io::Write;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{table_columns, TABLES};
use crate::error::{CrmError, CrmResult};

fn sql_literal(value: ValueRef<'_>) -> CrmResult<String> {
    Ok(match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => {
            if f.is_finite() {
                format!("{:?}", f)
            } else {
                "NULL".to_string()
            }
        }
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| CrmError::invalid(format!("non UTF-8 text column: {}", err)))?;
            format!("'{}'", text.replace('\'', "''"))
        }
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    })
}

/// Writes one `INSERT` per row for each table and returns the row count.
/// Unknown table names are rejected before anything is written.
pub fn export_tables<W: Write>(conn: &Connection, tables: &[String], out: &mut W) -> CrmResult<usize> {
    for table in tables {
        if !TABLES.contains(&table.as_str()) {
            return Err(CrmError::invalid(format!("unknown table: {}", table)));
        }
    }

    let mut total = 0;
    for table in tables {
        let columns = table_columns(conn, table)?;
        if columns.is_empty() {
            warn!(table = %table, "table missing from database, skipped");
            continue;
        }
        writeln!(out, "-- {}", table)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            columns.join(", "),
            table
        ))?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(sql_literal(row.get_ref(idx)?)?);
            }
            writeln!(
                out,
                "INSERT INTO {} ({}) VALUES ({});",
                table,
                columns.join(", "),
                values.join(", ")
            )?;
            count += 1;
        }
        writeln!(out)?;
        info!(table = %table, rows = count, "table exported");
        total += count;
    }
    Ok(total)
}

/// Every application table, in an order that satisfies foreign keys on import.
pub fn all_tables() -> Vec<String> {
    TABLES.iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::settings::{self, ServerInput};

    #[test]
    fn quotes_values() {
        assert_eq!(sql_literal(ValueRef::Null).unwrap(), "NULL");
        assert_eq!(sql_literal(ValueRef::Integer(7)).unwrap(), "7");
        assert_eq!(sql_literal(ValueRef::Real(4.0)).unwrap(), "4.0");
        assert_eq!(sql_literal(ValueRef::Text(b"D'Avila")).unwrap(), "'D''Avila'");
        assert_eq!(sql_literal(ValueRef::Blob(&[0xde, 0xad])).unwrap(), "X'dead'");
    }

    #[test]
    fn exports_rows_as_inserts() {
        let mut conn = db::open_in_memory().expect("db");
        settings::save_servers(
            &mut conn,
            &[ServerInput {
                name: "BLAZE".into(),
                cost: 4.0,
                is_active: true,
            }],
        )
        .unwrap();

        let mut out = Vec::new();
        let count = export_tables(&conn, &["servers".to_string()], &mut out).unwrap();
        let sql = String::from_utf8(out).unwrap();
        assert_eq!(count, 1);
        assert!(sql.contains(
            "INSERT INTO servers (id, name, cost, is_active) VALUES (1, 'BLAZE', 4.0, 1);"
        ));
    }

    #[test]
    fn skips_tables_an_older_database_lacks() {
        let conn = rusqlite::Connection::open_in_memory().expect("db");
        conn.execute_batch(
            "CREATE TABLE servers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO servers (name) VALUES ('BLAZE');",
        )
        .unwrap();

        let mut out = Vec::new();
        let tables = ["resellers".to_string(), "servers".to_string()];
        assert_eq!(export_tables(&conn, &tables, &mut out).unwrap(), 1);
        let sql = String::from_utf8(out).unwrap();
        assert!(!sql.contains("resellers"));
        assert!(sql.contains("INSERT INTO servers (id, name) VALUES (1, 'BLAZE');"));
    }

    #[test]
    fn rejects_unknown_tables() {
        let conn = db::open_in_memory().expect("db");
        let mut out = Vec::new();
        let err = export_tables(&conn, &["sqlite_master".to_string()], &mut out).unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
        assert!(out.is_empty());
    }
}

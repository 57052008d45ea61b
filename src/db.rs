use std::{fs, path::Path};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{CrmError, CrmResult};

pub const DATA_DIR_NAME: &str = "CyberpunkIPTV";
pub const DB_FILE_NAME: &str = "cyberpunk-iptv.db";

/// Every table the application owns, in dependency order.
pub const TABLES: &[&str] = &[
    "clients",
    "leads",
    "tests",
    "resellers",
    "credit_transactions",
    "revenue_transactions",
    "system_log",
    "plans",
    "servers",
    "payment_methods",
    "devices",
    "applications",
    "lead_sources",
];

/// Columns added after the first release. Older database files get them
/// through `ALTER TABLE` on startup.
const LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("clients", "archived", "INTEGER NOT NULL DEFAULT 0"),
    ("clients", "deleted_at", "TEXT"),
    ("clients", "payment_method", "TEXT"),
    ("clients", "mac_address", "TEXT"),
    ("leads", "migrated_from_client_id", "INTEGER"),
    ("leads", "migration_reason", "TEXT"),
    ("leads", "previous_plan", "TEXT"),
    ("leads", "previous_expiry", "TEXT"),
    ("revenue_transactions", "status", "TEXT NOT NULL DEFAULT 'committed'"),
    ("revenue_transactions", "cost_snapshot", "REAL NOT NULL DEFAULT 0"),
    ("revenue_transactions", "base_cost_snapshot", "REAL NOT NULL DEFAULT 0"),
    ("revenue_transactions", "months_snapshot", "INTEGER NOT NULL DEFAULT 1"),
    ("revenue_transactions", "server_snapshot", "TEXT"),
    ("revenue_transactions", "plan_snapshot", "TEXT"),
    ("revenue_transactions", "cost_resolved", "INTEGER NOT NULL DEFAULT 1"),
    ("revenue_transactions", "reversed_at", "TEXT"),
    ("revenue_transactions", "reversal_reason", "TEXT"),
    ("system_log", "metadata", "TEXT"),
    ("system_log", "client_id", "INTEGER"),
];

pub fn open_connection(path: &Path) -> CrmResult<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Opens an existing database file for reading only: nothing is created,
/// migrated or switched to WAL.
pub fn open_read_only(path: &Path) -> CrmResult<Connection> {
    if !path.is_file() {
        return Err(CrmError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("database not found: {}", path.display()),
        )));
    }
    Ok(Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?)
}

/// Opens a fresh in-memory database with the full schema applied.
pub fn open_in_memory() -> CrmResult<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    init_db(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> CrmResult<()> {
    // journal_mode answers with the resulting mode; in-memory databases stay "memory".
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    debug!(journal_mode = %mode, "sqlite pragmas applied");
    Ok(())
}

pub fn init_db(conn: &Connection) -> CrmResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clients (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          phone TEXT,
          email TEXT,
          plan TEXT,
          server TEXT,
          device TEXT,
          application TEXT,
          username TEXT,
          password TEXT,
          mac_address TEXT,
          price REAL NOT NULL DEFAULT 0,
          activation_date TEXT,
          expiry_date TEXT,
          payment_status TEXT NOT NULL DEFAULT 'Pendente',
          payment_date TEXT,
          payment_method TEXT,
          situation TEXT NOT NULL DEFAULT 'Ativo',
          notes TEXT,
          archived INTEGER NOT NULL DEFAULT 0,
          deleted_at TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS leads (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          phone TEXT,
          email TEXT,
          source TEXT,
          interest TEXT,
          status TEXT NOT NULL DEFAULT 'novo',
          notes TEXT,
          migrated_from_client_id INTEGER,
          migration_reason TEXT,
          previous_plan TEXT,
          previous_expiry TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tests (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          phone TEXT,
          server TEXT,
          device TEXT,
          application TEXT,
          username TEXT,
          password TEXT,
          start_at TEXT NOT NULL,
          end_at TEXT NOT NULL,
          duration_hours INTEGER NOT NULL,
          notes TEXT,
          created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS resellers (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          phone TEXT,
          email TEXT,
          server TEXT,
          buy_price REAL NOT NULL DEFAULT 0,
          sell_price REAL NOT NULL DEFAULT 0,
          total_sales REAL NOT NULL DEFAULT 0,
          is_active INTEGER NOT NULL DEFAULT 1,
          notes TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS credit_transactions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          reseller_id INTEGER NOT NULL,
          kind TEXT NOT NULL,
          credits INTEGER NOT NULL,
          unit_price REAL NOT NULL,
          total REAL NOT NULL,
          date_local TEXT NOT NULL,
          notes TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(reseller_id) REFERENCES resellers(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS revenue_transactions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          client_id INTEGER NOT NULL,
          kind TEXT NOT NULL,
          amount REAL NOT NULL,
          cost_snapshot REAL NOT NULL DEFAULT 0,
          base_cost_snapshot REAL NOT NULL DEFAULT 0,
          months_snapshot INTEGER NOT NULL DEFAULT 1,
          server_snapshot TEXT,
          plan_snapshot TEXT,
          cost_resolved INTEGER NOT NULL DEFAULT 1,
          description TEXT,
          payment_method TEXT,
          date_local TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'committed',
          reversed_at TEXT,
          reversal_reason TEXT,
          created_at TEXT NOT NULL,
          FOREIGN KEY(client_id) REFERENCES clients(id)
        );
        CREATE TABLE IF NOT EXISTS system_log (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          action TEXT NOT NULL,
          entity_type TEXT NOT NULL,
          entity_id INTEGER,
          client_id INTEGER,
          description TEXT NOT NULL,
          metadata TEXT,
          created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS plans (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          months INTEGER NOT NULL DEFAULT 1,
          price REAL NOT NULL DEFAULT 0,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS servers (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          cost REAL NOT NULL DEFAULT 0,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS payment_methods (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS devices (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS applications (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS lead_sources (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_revenue_client ON revenue_transactions(client_id);
        CREATE INDEX IF NOT EXISTS idx_system_log_entity ON system_log(entity_type, entity_id);",
    )?;

    ensure_late_columns(conn)?;
    info!("database schema ready");
    Ok(())
}

fn ensure_late_columns(conn: &Connection) -> CrmResult<()> {
    for (table, column, definition) in LATE_COLUMNS {
        if !table_has_column(conn, table, column)? {
            info!(table, column, "adding missing column");
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
                [],
            )?;
        }
    }
    Ok(())
}

pub(crate) fn table_has_column(conn: &Connection, table: &str, column: &str) -> CrmResult<bool> {
    Ok(table_columns(conn, table)?.iter().any(|name| name == column))
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> CrmResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = open_in_memory().expect("open");
        init_db(&conn).expect("second init");
        for table in TABLES {
            assert!(!table_columns(&conn, table).expect("columns").is_empty(), "{table}");
        }
    }

    #[test]
    fn adds_late_columns_to_legacy_tables() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE revenue_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                description TEXT,
                payment_method TEXT,
                date_local TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            INSERT INTO revenue_transactions (client_id, kind, amount, date_local, created_at)
            VALUES (1, 'renewal', 30, '2025-01-01', '2025-01-01 10:00:00');",
        )
        .expect("legacy schema");

        init_db(&conn).expect("init");

        assert!(table_has_column(&conn, "revenue_transactions", "status").unwrap());
        assert!(table_has_column(&conn, "revenue_transactions", "reversed_at").unwrap());
        let status: String = conn
            .query_row("SELECT status FROM revenue_transactions WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "committed");
    }

    #[test]
    fn read_only_open_requires_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join(DB_FILE_NAME);
        assert!(matches!(open_read_only(&path), Err(CrmError::Io(_))));
        assert!(!path.exists());
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn read_only_open_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DB_FILE_NAME);
        Connection::open(&path)
            .expect("create")
            .execute_batch("CREATE TABLE servers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .expect("schema");

        let conn = open_read_only(&path).expect("open");
        assert!(conn
            .execute("INSERT INTO servers (name) VALUES ('BLAZE')", [])
            .is_err());
        assert!(!table_has_column(&conn, "servers", "cost").unwrap());
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DATA_DIR_NAME).join(DB_FILE_NAME);
        let conn = open_connection(&path).expect("open");
        init_db(&conn).expect("init");

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
        assert!(path.exists());
    }
}

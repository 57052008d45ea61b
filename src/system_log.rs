//! Append-only audit trail of business events.

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::warn;

use crate::error::CrmResult;
use crate::now_timestamp;

text_enum! {
    pub enum LogAction {
        ClientAdded => "client_added",
        ClientUpdated => "client_updated",
        ClientDeleted => "client_deleted",
        ClientRestored => "client_restored",
        PaymentConfirmed => "payment_confirmed",
        TransactionAdded => "transaction_added",
        TransactionReverted => "transaction_reverted",
        LeadAdded => "lead_added",
        LeadUpdated => "lead_updated",
        LeadConverted => "lead_converted",
        ClientMigratedToLead => "client_migrated_to_lead",
        TestAdded => "test_added",
        ResellerAdded => "reseller_added",
        CreditTransactionAdded => "credit_transaction_added",
        SettingsUpdated => "settings_updated",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogEntry {
    pub id: i64,
    /// Kept as text: rows written by older versions use actions this build does not know.
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub client_id: Option<i64>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub action: LogAction,
    pub entity_type: &'static str,
    pub entity_id: Option<i64>,
    pub client_id: Option<i64>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewLogEntry {
    pub fn new(
        action: LogAction,
        entity_type: &'static str,
        entity_id: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action,
            entity_type,
            entity_id: Some(entity_id),
            client_id: None,
            description: description.into(),
            metadata: None,
        }
    }

    pub fn for_client(mut self, client_id: i64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

const SELECT_COLUMNS: &str =
    "id, action, entity_type, entity_id, client_id, description, metadata, created_at";

fn map_entry(row: &Row<'_>) -> rusqlite::Result<SystemLogEntry> {
    let metadata: Option<String> = row.get(6)?;
    Ok(SystemLogEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        client_id: row.get(4)?,
        description: row.get(5)?,
        // Unparseable metadata is kept out of the way rather than failing the listing.
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(7)?,
    })
}

pub fn append(conn: &Connection, entry: &NewLogEntry) -> CrmResult<i64> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO system_log (action, entity_type, entity_id, client_id, description, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.action,
            entry.entity_type,
            entry.entity_id,
            entry.client_id,
            entry.description,
            metadata,
            now_timestamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Writes the entry but never fails the caller: the audit row is secondary
/// to the business write it describes.
pub fn append_best_effort(conn: &Connection, entry: &NewLogEntry) {
    if let Err(err) = append(conn, entry) {
        warn!(action = %entry.action, error = %err, "failed to write system log entry");
    }
}

pub fn list_recent(conn: &Connection, limit: u32) -> CrmResult<Vec<SystemLogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM system_log ORDER BY id DESC LIMIT ?1",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([limit], map_entry)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn list_for_client(conn: &Connection, client_id: i64) -> CrmResult<Vec<SystemLogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM system_log
         WHERE client_id = ?1 OR (entity_type = 'client' AND entity_id = ?1)
         ORDER BY id DESC",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([client_id], map_entry)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn delete_for_entity(conn: &Connection, entity_type: &str, entity_id: i64) -> CrmResult<usize> {
    Ok(conn.execute(
        "DELETE FROM system_log WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type, entity_id],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn append_and_list_newest_first() {
        let conn = db::open_in_memory().expect("db");
        append(
            &conn,
            &NewLogEntry::new(LogAction::ClientAdded, "client", 1, "Cliente adicionado: Ana")
                .for_client(1),
        )
        .unwrap();
        append(
            &conn,
            &NewLogEntry::new(LogAction::PaymentConfirmed, "client", 1, "Pagamento confirmado")
                .for_client(1)
                .with_metadata(serde_json::json!({ "amount": 30.0 })),
        )
        .unwrap();

        let entries = list_recent(&conn, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "payment_confirmed");
        assert_eq!(entries[0].metadata.as_ref().unwrap()["amount"], 30.0);
        assert_eq!(list_for_client(&conn, 1).unwrap().len(), 2);
    }

    #[test]
    fn delete_only_touches_matching_entity() {
        let conn = db::open_in_memory().expect("db");
        append(&conn, &NewLogEntry::new(LogAction::LeadAdded, "lead", 3, "a")).unwrap();
        append(&conn, &NewLogEntry::new(LogAction::LeadAdded, "lead", 4, "b")).unwrap();
        append(&conn, &NewLogEntry::new(LogAction::ClientAdded, "client", 3, "c")).unwrap();

        assert_eq!(delete_for_entity(&conn, "lead", 3).unwrap(), 1);
        assert_eq!(list_recent(&conn, 10).unwrap().len(), 2);
    }

    #[test]
    fn best_effort_swallows_failures() {
        let conn = db::open_in_memory().expect("db");
        conn.execute_batch("DROP TABLE system_log").unwrap();
        append_best_effort(&conn, &NewLogEntry::new(LogAction::TestAdded, "test", 1, "x"));
    }
}

//! Prospects, deduplicated by phone number.
//!
//! Duplicate detection scans every stored lead and compares digits only,
//! so "(11) 98765-4321" and "11987654321" are the same lead.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::{self, Client, ClientInput};
use crate::error::{CrmError, CrmResult};
use crate::system_log::{self, LogAction, NewLogEntry};
use crate::{clean, now_timestamp, required};

text_enum! {
    pub enum LeadStatus {
        New => "novo",
        Contacted => "contatado",
        Converted => "convertido",
        Lost => "perdido",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub source: Option<String>,
    pub interest: Option<String>,
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub migrated_from_client_id: Option<i64>,
    pub migration_reason: Option<String>,
    pub previous_plan: Option<String>,
    pub previous_expiry: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadInput {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub source: Option<String>,
    pub interest: Option<String>,
    pub status: Option<LeadStatus>,
    pub notes: Option<String>,
}

struct Migration {
    client_id: i64,
    reason: Option<String>,
    previous_plan: Option<String>,
    previous_expiry: Option<String>,
}

pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

const SELECT_COLUMNS: &str = "id, name, phone, email, source, interest, status, notes, \
     migrated_from_client_id, migration_reason, previous_plan, previous_expiry, created_at, updated_at";

fn map_lead(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        source: row.get(4)?,
        interest: row.get(5)?,
        status: row.get(6)?,
        notes: row.get(7)?,
        migrated_from_client_id: row.get(8)?,
        migration_reason: row.get(9)?,
        previous_plan: row.get(10)?,
        previous_expiry: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

pub fn get_lead(conn: &Connection, id: i64) -> CrmResult<Lead> {
    conn.query_row(
        &format!("SELECT {} FROM leads WHERE id = ?1", SELECT_COLUMNS),
        [id],
        map_lead,
    )
    .optional()?
    .ok_or_else(|| CrmError::not_found("lead", id))
}

pub fn list_leads(conn: &Connection) -> CrmResult<Vec<Lead>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM leads ORDER BY created_at DESC, id DESC",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([], map_lead)?;

    let mut leads = Vec::new();
    for row in rows {
        leads.push(row?);
    }
    Ok(leads)
}

/// Id of a lead, other than `exclude_id`, whose phone has the same digits.
fn find_by_phone(conn: &Connection, phone: &str, exclude_id: Option<i64>) -> CrmResult<Option<i64>> {
    let wanted = normalize_phone(phone);
    if wanted.is_empty() {
        return Ok(None);
    }
    let mut stmt = conn.prepare("SELECT id, phone FROM leads WHERE phone IS NOT NULL")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let stored: String = row.get(1)?;
        if Some(id) != exclude_id && normalize_phone(&stored) == wanted {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Inserts a lead, or returns the existing one untouched when its phone
/// number is already known.
pub fn add_lead(conn: &Connection, input: LeadInput) -> CrmResult<Lead> {
    insert_lead(conn, input, None).map(|(lead, _)| lead)
}

/// Returns the lead and whether a new row was written.
fn insert_lead(
    conn: &Connection,
    input: LeadInput,
    migration: Option<Migration>,
) -> CrmResult<(Lead, bool)> {
    let name = required("name", &input.name)?;
    let phone = clean(input.phone);
    if let Some(phone) = &phone {
        if let Some(existing_id) = find_by_phone(conn, phone, None)? {
            debug!(lead_id = existing_id, "lead with same phone already exists");
            return Ok((get_lead(conn, existing_id)?, false));
        }
    }

    let now = now_timestamp();
    let (client_id, reason, previous_plan, previous_expiry) = match migration {
        Some(m) => (Some(m.client_id), m.reason, m.previous_plan, m.previous_expiry),
        None => (None, None, None, None),
    };
    conn.execute(
        "INSERT INTO leads (name, phone, email, source, interest, status, notes, migrated_from_client_id,
                            migration_reason, previous_plan, previous_expiry, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            name,
            phone,
            clean(input.email),
            clean(input.source),
            clean(input.interest),
            input.status.unwrap_or(LeadStatus::New),
            clean(input.notes),
            client_id,
            reason,
            previous_plan,
            previous_expiry,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();

    system_log::append_best_effort(
        conn,
        &NewLogEntry::new(LogAction::LeadAdded, "lead", id, format!("Lead adicionado: {}", name)),
    );
    Ok((get_lead(conn, id)?, true))
}

pub fn update_lead(conn: &Connection, id: i64, input: LeadInput) -> CrmResult<Lead> {
    let current = get_lead(conn, id)?;
    let name = required("name", &input.name)?;
    let phone = clean(input.phone);
    if let Some(phone) = &phone {
        if let Some(existing_id) = find_by_phone(conn, phone, Some(id))? {
            return Err(CrmError::DuplicatePhone {
                phone: phone.clone(),
                existing_id,
            });
        }
    }

    conn.execute(
        "UPDATE leads SET name = ?1, phone = ?2, email = ?3, source = ?4, interest = ?5, status = ?6,
                notes = ?7, updated_at = ?8
         WHERE id = ?9",
        params![
            name,
            phone,
            clean(input.email),
            clean(input.source),
            clean(input.interest),
            input.status.unwrap_or(current.status),
            clean(input.notes),
            now_timestamp(),
            id
        ],
    )?;

    system_log::append_best_effort(
        conn,
        &NewLogEntry::new(LogAction::LeadUpdated, "lead", id, format!("Lead atualizado: {}", name)),
    );
    get_lead(conn, id)
}

/// Hard delete, taking the lead's audit rows with it.
pub fn delete_lead(conn: &mut Connection, id: i64) -> CrmResult<()> {
    let tx = conn.transaction()?;
    system_log::delete_for_entity(&tx, "lead", id)?;
    if tx.execute("DELETE FROM leads WHERE id = ?1", [id])? == 0 {
        return Err(CrmError::not_found("lead", id));
    }
    tx.commit()?;
    debug!(lead_id = id, "lead deleted");
    Ok(())
}

/// Turns an expired or cancelled client back into a prospect. Phone
/// deduplication still applies: a client already tracked as a lead yields
/// that lead untouched, and no migration is logged.
pub fn migrate_client_to_lead(
    conn: &mut Connection,
    client_id: i64,
    reason: Option<String>,
) -> CrmResult<Lead> {
    let tx = conn.transaction()?;
    let client = clients::get_client(&tx, client_id)?;
    let input = LeadInput {
        name: client.name.clone(),
        phone: client.phone.clone(),
        email: client.email.clone(),
        interest: client.plan.clone(),
        notes: client.notes.clone(),
        ..LeadInput::default()
    };
    let (lead, created) = insert_lead(
        &tx,
        input,
        Some(Migration {
            client_id,
            reason: clean(reason),
            previous_plan: client.plan.clone(),
            previous_expiry: client.expiry_date.clone(),
        }),
    )?;
    if !created {
        debug!(lead_id = lead.id, client_id, "client already tracked as a lead");
        return Ok(lead);
    }

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::ClientMigratedToLead,
            "lead",
            lead.id,
            format!("Cliente migrado para lead: {}", client.name),
        )
        .for_client(client_id),
    )?;
    tx.commit()?;
    Ok(lead)
}

/// Creates a client from a lead and marks the lead converted, in one SQL
/// transaction.
pub fn convert_lead_to_client(
    conn: &mut Connection,
    lead_id: i64,
    client: ClientInput,
) -> CrmResult<Client> {
    let tx = conn.transaction()?;
    let lead = get_lead(&tx, lead_id)?;
    if lead.status == LeadStatus::Converted {
        return Err(CrmError::invalid(format!("lead {} was already converted", lead_id)));
    }
    let client = ClientInput {
        phone: client.phone.or(lead.phone),
        email: client.email.or(lead.email),
        ..client
    };
    let client_id = clients::insert_client(&tx, client)?;
    let created = clients::get_client(&tx, client_id)?;

    tx.execute(
        "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![LeadStatus::Converted, now_timestamp(), lead_id],
    )?;
    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::LeadConverted,
            "lead",
            lead_id,
            format!("Lead convertido em cliente: {}", created.name),
        )
        .for_client(created.id),
    )?;
    tx.commit()?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::tests::sample_client;
    use crate::db;

    fn lead(name: &str, phone: &str) -> LeadInput {
        LeadInput {
            name: name.to_string(),
            phone: Some(phone.to_string()),
            source: Some("Instagram".to_string()),
            ..LeadInput::default()
        }
    }

    fn count_leads(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn normalize_strips_non_digits() {
        assert_eq!(normalize_phone("+55 (11) 98765-4321"), "5511987654321");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn duplicate_insert_returns_existing_lead() {
        let conn = db::open_in_memory().expect("db");
        let first = add_lead(&conn, lead("Ana", "(11) 98765-4321")).unwrap();
        let second = add_lead(&conn, lead("Ana Paula", "11987654321")).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "Ana");
        assert_eq!(count_leads(&conn), 1);
    }

    #[test]
    fn leads_without_phone_are_not_deduplicated() {
        let conn = db::open_in_memory().expect("db");
        add_lead(&conn, lead("Ana", " ")).unwrap();
        add_lead(&conn, lead("Bruno", "--")).unwrap();
        assert_eq!(count_leads(&conn), 2);
    }

    #[test]
    fn update_to_taken_phone_rejects() {
        let conn = db::open_in_memory().expect("db");
        let ana = add_lead(&conn, lead("Ana", "11 98765-4321")).unwrap();
        let bruno = add_lead(&conn, lead("Bruno", "11 91111-2222")).unwrap();

        let err = update_lead(&conn, bruno.id, lead("Bruno", "(11) 98765 4321")).unwrap_err();
        match err {
            CrmError::DuplicatePhone { existing_id, .. } => assert_eq!(existing_id, ana.id),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(get_lead(&conn, bruno.id).unwrap().phone.as_deref(), Some("11 91111-2222"));
    }

    #[test]
    fn update_keeping_own_phone_is_allowed() {
        let conn = db::open_in_memory().expect("db");
        let ana = add_lead(&conn, lead("Ana", "11 98765-4321")).unwrap();
        let mut edit = lead("Ana Souza", "11987654321");
        edit.status = Some(LeadStatus::Contacted);

        let updated = update_lead(&conn, ana.id, edit).unwrap();
        assert_eq!(updated.name, "Ana Souza");
        assert_eq!(updated.status, LeadStatus::Contacted);
    }

    #[test]
    fn delete_removes_lead_and_its_log() {
        let mut conn = db::open_in_memory().expect("db");
        let ana = add_lead(&conn, lead("Ana", "11 98765-4321")).unwrap();
        let bruno = add_lead(&conn, lead("Bruno", "11 91111-2222")).unwrap();

        delete_lead(&mut conn, ana.id).unwrap();
        assert_eq!(count_leads(&conn), 1);
        let remaining: Vec<_> = system_log::list_recent(&conn, 10)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.entity_id)
            .collect();
        assert_eq!(remaining, vec![bruno.id]);
        assert!(matches!(delete_lead(&mut conn, ana.id), Err(CrmError::NotFound { .. })));
    }

    #[test]
    fn migrated_client_carries_metadata() {
        let mut conn = db::open_in_memory().expect("db");
        let client = clients::add_client(&mut conn, sample_client("Carla")).unwrap();

        let lead = migrate_client_to_lead(&mut conn, client.id, Some("vencido".into())).unwrap();
        assert_eq!(lead.migrated_from_client_id, Some(client.id));
        assert_eq!(lead.migration_reason.as_deref(), Some("vencido"));
        assert_eq!(lead.previous_plan.as_deref(), Some("MENSAL"));
        assert_eq!(lead.previous_expiry.as_deref(), Some("2025-06-01"));
        assert_eq!(lead.status, LeadStatus::New);
    }

    #[test]
    fn migrating_a_tracked_phone_returns_existing_lead_unlogged() {
        let mut conn = db::open_in_memory().expect("db");
        let old = add_lead(&conn, lead("Old", "11987654321")).unwrap();
        let client = clients::add_client(&mut conn, sample_client("Carla")).unwrap();

        let migrated = migrate_client_to_lead(&mut conn, client.id, Some("vencido".into())).unwrap();
        assert_eq!(migrated.id, old.id);
        assert_eq!(migrated.name, "Old");
        assert_eq!(migrated.migrated_from_client_id, None);
        assert_eq!(count_leads(&conn), 1);
        let actions: Vec<_> = system_log::list_recent(&conn, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(!actions.iter().any(|a| a == "client_migrated_to_lead"));
    }

    #[test]
    fn failed_conversion_leaves_no_client() {
        let mut conn = db::open_in_memory().expect("db");
        let ana = add_lead(&conn, lead("Ana", "11 98765-4321")).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER block_lead_update BEFORE UPDATE ON leads
             BEGIN SELECT RAISE(ABORT, 'leads are read only'); END;",
        )
        .unwrap();

        assert!(convert_lead_to_client(&mut conn, ana.id, sample_client("Ana")).is_err());
        let clients: i64 = conn
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(clients, 0);
        assert_eq!(get_lead(&conn, ana.id).unwrap().status, LeadStatus::New);
    }

    #[test]
    fn convert_marks_lead_and_creates_client() {
        let mut conn = db::open_in_memory().expect("db");
        let ana = add_lead(&conn, lead("Ana", "11 98765-4321")).unwrap();
        let mut input = sample_client("Ana");
        input.phone = None;

        let client = convert_lead_to_client(&mut conn, ana.id, input.clone()).unwrap();
        assert_eq!(client.phone.as_deref(), Some("11 98765-4321"));
        assert_eq!(get_lead(&conn, ana.id).unwrap().status, LeadStatus::Converted);
        assert!(convert_lead_to_client(&mut conn, ana.id, input).is_err());
    }
}

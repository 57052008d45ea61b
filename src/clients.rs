use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrmError, CrmResult};
use crate::system_log::{self, LogAction, NewLogEntry};
use crate::{clean, now_timestamp, parse_date, required, DATE_FORMAT};

text_enum! {
    pub enum PaymentStatus {
        Paid => "Pago",
        Pending => "Pendente",
        Overdue => "Atrasado",
    }
}

text_enum! {
    pub enum ClientSituation {
        Active => "Ativo",
        Inactive => "Inativo",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub plan: Option<String>,
    pub server: Option<String>,
    pub device: Option<String>,
    pub application: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mac_address: Option<String>,
    pub price: f64,
    pub activation_date: Option<String>,
    pub expiry_date: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<String>,
    pub payment_method: Option<String>,
    pub situation: ClientSituation,
    pub notes: Option<String>,
    pub archived: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload for creating or editing a client. Omitted enum fields keep
/// their column defaults on insert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInput {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub plan: Option<String>,
    pub server: Option<String>,
    pub device: Option<String>,
    pub application: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mac_address: Option<String>,
    #[serde(default)]
    pub price: f64,
    pub activation_date: Option<String>,
    pub expiry_date: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_date: Option<String>,
    pub payment_method: Option<String>,
    pub situation: Option<ClientSituation>,
    pub notes: Option<String>,
}

impl ClientInput {
    fn validated(self) -> CrmResult<Self> {
        if self.price < 0.0 {
            return Err(CrmError::invalid("price cannot be negative"));
        }
        let dates = [&self.activation_date, &self.expiry_date, &self.payment_date];
        for date in dates.into_iter().flatten() {
            if !date.trim().is_empty() {
                parse_date(date.trim())?;
            }
        }
        Ok(ClientInput {
            name: required("name", &self.name)?,
            phone: clean(self.phone),
            email: clean(self.email),
            plan: clean(self.plan),
            server: clean(self.server),
            device: clean(self.device),
            application: clean(self.application),
            username: clean(self.username),
            password: clean(self.password),
            mac_address: clean(self.mac_address),
            price: self.price,
            activation_date: clean(self.activation_date),
            expiry_date: clean(self.expiry_date),
            payment_status: self.payment_status,
            payment_date: clean(self.payment_date),
            payment_method: clean(self.payment_method),
            situation: self.situation,
            notes: clean(self.notes),
        })
    }
}

pub(crate) const SELECT_COLUMNS: &str = "id, name, phone, email, plan, server, device, application, \
     username, password, mac_address, price, activation_date, expiry_date, payment_status, \
     payment_date, payment_method, situation, notes, archived, deleted_at, created_at, updated_at";

pub(crate) fn map_client(row: &Row<'_>) -> rusqlite::Result<Client> {
    let archived: i64 = row.get(19)?;
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        plan: row.get(4)?,
        server: row.get(5)?,
        device: row.get(6)?,
        application: row.get(7)?,
        username: row.get(8)?,
        password: row.get(9)?,
        mac_address: row.get(10)?,
        price: row.get(11)?,
        activation_date: row.get(12)?,
        expiry_date: row.get(13)?,
        payment_status: row.get(14)?,
        payment_date: row.get(15)?,
        payment_method: row.get(16)?,
        situation: row.get(17)?,
        notes: row.get(18)?,
        archived: archived != 0,
        deleted_at: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}

pub fn get_client(conn: &Connection, id: i64) -> CrmResult<Client> {
    conn.query_row(
        &format!("SELECT {} FROM clients WHERE id = ?1", SELECT_COLUMNS),
        [id],
        map_client,
    )
    .optional()?
    .ok_or_else(|| CrmError::not_found("client", id))
}

pub fn list_clients(conn: &Connection, include_archived: bool) -> CrmResult<Vec<Client>> {
    let sql = if include_archived {
        format!("SELECT {} FROM clients ORDER BY name COLLATE NOCASE", SELECT_COLUMNS)
    } else {
        format!(
            "SELECT {} FROM clients WHERE archived = 0 ORDER BY name COLLATE NOCASE",
            SELECT_COLUMNS
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], map_client)?;

    let mut clients = Vec::new();
    for row in rows {
        clients.push(row?);
    }
    Ok(clients)
}

/// Active clients whose expiry falls between `today` and `today + within_days`.
pub fn list_expiring(conn: &Connection, today: &str, within_days: i64) -> CrmResult<Vec<Client>> {
    let start = parse_date(today)?;
    let end = Duration::try_days(within_days.max(0))
        .and_then(|window| start.checked_add_signed(window))
        .ok_or_else(|| CrmError::invalid(format!("expiry window too large: {} days", within_days)))?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM clients
         WHERE archived = 0 AND situation = 'Ativo'
           AND expiry_date IS NOT NULL AND expiry_date >= ?1 AND expiry_date <= ?2
         ORDER BY expiry_date, name COLLATE NOCASE",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string()
        ],
        map_client,
    )?;

    let mut clients = Vec::new();
    for row in rows {
        clients.push(row?);
    }
    Ok(clients)
}

pub fn add_client(conn: &mut Connection, input: ClientInput) -> CrmResult<Client> {
    let tx = conn.transaction()?;
    let id = insert_client(&tx, input)?;
    tx.commit()?;
    debug!(client_id = id, "client added");

    get_client(conn, id)
}

/// Inserts the client and its `client_added` log row on the caller's
/// connection, so it can join a larger SQL transaction.
pub(crate) fn insert_client(conn: &Connection, input: ClientInput) -> CrmResult<i64> {
    let input = input.validated()?;
    let now = now_timestamp();

    conn.execute(
        "INSERT INTO clients (name, phone, email, plan, server, device, application, username,
                              password, mac_address, price, activation_date, expiry_date,
                              payment_status, payment_date, payment_method, situation, notes,
                              archived, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, 0, ?19, ?19)",
        params![
            input.name,
            input.phone,
            input.email,
            input.plan,
            input.server,
            input.device,
            input.application,
            input.username,
            input.password,
            input.mac_address,
            input.price,
            input.activation_date,
            input.expiry_date,
            input.payment_status.unwrap_or(PaymentStatus::Pending),
            input.payment_date,
            input.payment_method,
            input.situation.unwrap_or(ClientSituation::Active),
            input.notes,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();

    system_log::append(
        conn,
        &NewLogEntry::new(
            LogAction::ClientAdded,
            "client",
            id,
            format!("Cliente adicionado: {}", input.name),
        )
        .for_client(id),
    )?;
    Ok(id)
}

pub fn update_client(conn: &mut Connection, id: i64, input: ClientInput) -> CrmResult<Client> {
    let input = input.validated()?;
    let current = get_client(conn, id)?;
    let tx = conn.transaction()?;

    tx.execute(
        "UPDATE clients SET name = ?1, phone = ?2, email = ?3, plan = ?4, server = ?5, device = ?6,
                application = ?7, username = ?8, password = ?9, mac_address = ?10, price = ?11,
                activation_date = ?12, expiry_date = ?13, payment_status = ?14, payment_date = ?15,
                payment_method = ?16, situation = ?17, notes = ?18, updated_at = ?19
         WHERE id = ?20",
        params![
            input.name,
            input.phone,
            input.email,
            input.plan,
            input.server,
            input.device,
            input.application,
            input.username,
            input.password,
            input.mac_address,
            input.price,
            input.activation_date,
            input.expiry_date,
            input.payment_status.unwrap_or(current.payment_status),
            input.payment_date,
            input.payment_method,
            input.situation.unwrap_or(current.situation),
            input.notes,
            now_timestamp(),
            id
        ],
    )?;

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::ClientUpdated,
            "client",
            id,
            format!("Cliente atualizado: {}", input.name),
        )
        .for_client(id),
    )?;
    tx.commit()?;

    get_client(conn, id)
}

/// Soft delete: the row stays for revenue history and the audit trail.
/// Deleting an archived client returns it unchanged.
pub fn delete_client(conn: &mut Connection, id: i64) -> CrmResult<Client> {
    let tx = conn.transaction()?;
    let now = now_timestamp();
    let changed = tx.execute(
        "UPDATE clients SET archived = 1, situation = ?1, deleted_at = ?2, updated_at = ?2
         WHERE id = ?3 AND archived = 0",
        params![ClientSituation::Inactive, now, id],
    )?;
    if changed == 0 {
        return get_client(&tx, id);
    }
    let name: String = tx.query_row("SELECT name FROM clients WHERE id = ?1", [id], |row| {
        row.get(0)
    })?;

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::ClientDeleted,
            "client",
            id,
            format!("Cliente removido: {}", name),
        )
        .for_client(id),
    )?;
    tx.commit()?;
    debug!(client_id = id, "client archived");

    get_client(conn, id)
}

pub fn restore_client(conn: &mut Connection, id: i64) -> CrmResult<Client> {
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE clients SET archived = 0, situation = ?1, deleted_at = NULL, updated_at = ?2
         WHERE id = ?3 AND archived = 1",
        params![ClientSituation::Active, now_timestamp(), id],
    )?;
    if changed == 0 {
        return Err(CrmError::not_found("archived client", id));
    }

    system_log::append(
        &tx,
        &NewLogEntry::new(LogAction::ClientRestored, "client", id, "Cliente restaurado")
            .for_client(id),
    )?;
    tx.commit()?;

    get_client(conn, id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub(crate) fn sample_client(name: &str) -> ClientInput {
        ClientInput {
            name: name.to_string(),
            phone: Some("(11) 98765-4321".to_string()),
            plan: Some("MENSAL".to_string()),
            server: Some("BLAZE".to_string()),
            price: 30.0,
            activation_date: Some("2025-05-01".to_string()),
            expiry_date: Some("2025-06-01".to_string()),
            ..ClientInput::default()
        }
    }

    #[test]
    fn add_client_applies_defaults() {
        let mut conn = db::open_in_memory().expect("db");
        let client = add_client(&mut conn, sample_client("  Ana  ")).unwrap();

        assert_eq!(client.name, "Ana");
        assert_eq!(client.payment_status, PaymentStatus::Pending);
        assert_eq!(client.situation, ClientSituation::Active);
        assert!(!client.archived);
        assert_eq!(system_log::list_for_client(&conn, client.id).unwrap().len(), 1);
    }

    #[test]
    fn add_client_requires_name() {
        let mut conn = db::open_in_memory().expect("db");
        let err = add_client(&mut conn, sample_client(" ")).unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
    }

    #[test]
    fn delete_archives_instead_of_removing() {
        let mut conn = db::open_in_memory().expect("db");
        let client = add_client(&mut conn, sample_client("Bruno")).unwrap();

        let deleted = delete_client(&mut conn, client.id).unwrap();
        assert!(deleted.archived);
        assert_eq!(deleted.situation, ClientSituation::Inactive);
        assert!(deleted.deleted_at.is_some());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert!(list_clients(&conn, false).unwrap().is_empty());
        assert_eq!(list_clients(&conn, true).unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_client_is_not_found() {
        let mut conn = db::open_in_memory().expect("db");
        let err = delete_client(&mut conn, 99).unwrap_err();
        assert!(matches!(err, CrmError::NotFound { entity: "client", id: 99 }));
        assert!(system_log::list_recent(&conn, 10).unwrap().is_empty());
    }

    #[test]
    fn restore_brings_client_back() {
        let mut conn = db::open_in_memory().expect("db");
        let client = add_client(&mut conn, sample_client("Carla")).unwrap();
        delete_client(&mut conn, client.id).unwrap();

        let restored = restore_client(&mut conn, client.id).unwrap();
        assert!(!restored.archived);
        assert_eq!(restored.situation, ClientSituation::Active);
        assert!(restored.deleted_at.is_none());
        assert!(restore_client(&mut conn, client.id).is_err());
    }

    #[test]
    fn update_keeps_status_when_omitted() {
        let mut conn = db::open_in_memory().expect("db");
        let mut input = sample_client("Davi");
        input.payment_status = Some(PaymentStatus::Paid);
        let client = add_client(&mut conn, input).unwrap();

        let mut edit = sample_client("Davi Souza");
        edit.price = 35.0;
        let updated = update_client(&mut conn, client.id, edit).unwrap();
        assert_eq!(updated.name, "Davi Souza");
        assert_eq!(updated.price, 35.0);
        assert_eq!(updated.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn delete_twice_keeps_first_stamp() {
        let mut conn = db::open_in_memory().expect("db");
        let client = add_client(&mut conn, sample_client("Elis")).unwrap();
        let first = delete_client(&mut conn, client.id).unwrap();

        let again = delete_client(&mut conn, client.id).unwrap();
        assert_eq!(again.deleted_at, first.deleted_at);
        let deletions = system_log::list_for_client(&conn, client.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "client_deleted")
            .count();
        assert_eq!(deletions, 1);
    }

    #[test]
    fn oversized_expiry_window_is_rejected() {
        let conn = db::open_in_memory().expect("db");
        assert!(matches!(
            list_expiring(&conn, "2025-06-01", i64::MAX),
            Err(CrmError::Validation(_))
        ));
        assert!(list_expiring(&conn, "2025-06-01", 3650).unwrap().is_empty());
    }

    #[test]
    fn expiring_window_is_inclusive() {
        let mut conn = db::open_in_memory().expect("db");
        let mut soon = sample_client("Soon");
        soon.expiry_date = Some("2025-06-03".into());
        let mut later = sample_client("Later");
        later.expiry_date = Some("2025-07-01".into());
        add_client(&mut conn, soon).unwrap();
        add_client(&mut conn, later).unwrap();

        let names: Vec<_> = list_expiring(&conn, "2025-06-01", 2)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Soon"]);
    }
}

//! Reference lists edited from the settings screen. Each list is saved by
//! replacing the whole table inside one SQL transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CrmResult;
use crate::required;
use crate::system_log::{self, LogAction, NewLogEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub months: i64,
    pub price: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub name: String,
    #[serde(default = "default_months")]
    pub months: i64,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub cost: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInput {
    pub name: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupItem {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupInput {
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// The name-only lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupList {
    PaymentMethods,
    Devices,
    Applications,
    LeadSources,
}

impl LookupList {
    pub const ALL: [LookupList; 4] = [
        LookupList::PaymentMethods,
        LookupList::Devices,
        LookupList::Applications,
        LookupList::LeadSources,
    ];

    fn table(self) -> &'static str {
        match self {
            LookupList::PaymentMethods => "payment_methods",
            LookupList::Devices => "devices",
            LookupList::Applications => "applications",
            LookupList::LeadSources => "lead_sources",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub plans: Vec<Plan>,
    pub servers: Vec<Server>,
    pub payment_methods: Vec<LookupItem>,
    pub devices: Vec<LookupItem>,
    pub applications: Vec<LookupItem>,
    pub lead_sources: Vec<LookupItem>,
}

fn default_months() -> i64 {
    1
}

fn default_active() -> bool {
    true
}

pub fn get_settings(conn: &Connection) -> CrmResult<Settings> {
    Ok(Settings {
        plans: get_plans(conn)?,
        servers: get_servers(conn)?,
        payment_methods: get_lookup(conn, LookupList::PaymentMethods)?,
        devices: get_lookup(conn, LookupList::Devices)?,
        applications: get_lookup(conn, LookupList::Applications)?,
        lead_sources: get_lookup(conn, LookupList::LeadSources)?,
    })
}

pub fn get_plans(conn: &Connection) -> CrmResult<Vec<Plan>> {
    let mut stmt =
        conn.prepare("SELECT id, name, months, price, is_active FROM plans ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        let active: i64 = row.get(4)?;
        Ok(Plan {
            id: row.get(0)?,
            name: row.get(1)?,
            months: row.get(2)?,
            price: row.get(3)?,
            is_active: active != 0,
        })
    })?;

    let mut plans = Vec::new();
    for row in rows {
        plans.push(row?);
    }
    Ok(plans)
}

pub fn get_servers(conn: &Connection) -> CrmResult<Vec<Server>> {
    let mut stmt = conn.prepare("SELECT id, name, cost, is_active FROM servers ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        let active: i64 = row.get(3)?;
        Ok(Server {
            id: row.get(0)?,
            name: row.get(1)?,
            cost: row.get(2)?,
            is_active: active != 0,
        })
    })?;

    let mut servers = Vec::new();
    for row in rows {
        servers.push(row?);
    }
    Ok(servers)
}

pub fn get_lookup(conn: &Connection, list: LookupList) -> CrmResult<Vec<LookupItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, is_active FROM {} ORDER BY id",
        list.table()
    ))?;
    let rows = stmt.query_map([], |row| {
        let active: i64 = row.get(2)?;
        Ok(LookupItem {
            id: row.get(0)?,
            name: row.get(1)?,
            is_active: active != 0,
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn save_plans(conn: &mut Connection, plans: &[PlanInput]) -> CrmResult<Vec<Plan>> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM plans", [])?;
    for plan in plans {
        let name = required("plan name", &plan.name)?;
        if plan.months < 1 {
            return Err(crate::CrmError::invalid(format!(
                "plan {} must last at least one month",
                name
            )));
        }
        tx.execute(
            "INSERT INTO plans (name, months, price, is_active) VALUES (?1, ?2, ?3, ?4)",
            params![name, plan.months, plan.price, plan.is_active],
        )?;
    }
    log_replace(&tx, "plans", plans.len())?;
    tx.commit()?;
    debug!(count = plans.len(), "plans replaced");
    get_plans(conn)
}

pub fn save_servers(conn: &mut Connection, servers: &[ServerInput]) -> CrmResult<Vec<Server>> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM servers", [])?;
    for server in servers {
        let name = required("server name", &server.name)?;
        tx.execute(
            "INSERT INTO servers (name, cost, is_active) VALUES (?1, ?2, ?3)",
            params![name, server.cost, server.is_active],
        )?;
    }
    log_replace(&tx, "servers", servers.len())?;
    tx.commit()?;
    debug!(count = servers.len(), "servers replaced");
    get_servers(conn)
}

pub fn save_lookup(
    conn: &mut Connection,
    list: LookupList,
    items: &[LookupInput],
) -> CrmResult<Vec<LookupItem>> {
    let table = list.table();
    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM {}", table), [])?;
    for item in items {
        let name = required("name", &item.name)?;
        tx.execute(
            &format!("INSERT INTO {} (name, is_active) VALUES (?1, ?2)", table),
            params![name, item.is_active],
        )?;
    }
    log_replace(&tx, table, items.len())?;
    tx.commit()?;
    debug!(table, count = items.len(), "lookup list replaced");
    get_lookup(conn, list)
}

fn log_replace(conn: &Connection, table: &'static str, count: usize) -> CrmResult<()> {
    system_log::append(
        conn,
        &NewLogEntry {
            action: LogAction::SettingsUpdated,
            entity_type: "settings",
            entity_id: None,
            client_id: None,
            description: format!("Configurações atualizadas: {} ({} itens)", table, count),
            metadata: Some(serde_json::json!({ "table": table, "count": count })),
        },
    )?;
    Ok(())
}

/// Server cost by name, matched case-insensitively after trimming.
pub fn find_server_cost(conn: &Connection, name: &str) -> CrmResult<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT cost FROM servers WHERE LOWER(TRIM(name)) = LOWER(TRIM(?1)) ORDER BY id LIMIT 1",
            [name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Plan duration in months by name, matched like [`find_server_cost`].
pub fn find_plan_months(conn: &Connection, name: &str) -> CrmResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT months FROM plans WHERE LOWER(TRIM(name)) = LOWER(TRIM(?1)) ORDER BY id LIMIT 1",
            [name],
            |row| row.get(0),
        )
        .optional()?)
}

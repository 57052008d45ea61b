//! Wholesale partners and their credit ledger.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrmError, CrmResult};
use crate::system_log::{self, LogAction, NewLogEntry};
use crate::{clean, now_timestamp, required, resolve_date_local};

text_enum! {
    pub enum CreditKind {
        /// Credits bought from the panel at the reseller's buy price.
        Purchase => "compra",
        /// Credits sold on to the reseller's own customers.
        Sale => "venda",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reseller {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub server: Option<String>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub total_sales: f64,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResellerInput {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub server: Option<String>,
    #[serde(default)]
    pub buy_price: f64,
    #[serde(default)]
    pub sell_price: f64,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: i64,
    pub reseller_id: i64,
    pub kind: CreditKind,
    pub credits: i64,
    pub unit_price: f64,
    pub total: f64,
    pub date_local: String,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCreditTransaction {
    pub reseller_id: i64,
    pub kind: CreditKind,
    pub credits: i64,
    /// Defaults to the reseller's buy or sell price for the kind.
    pub unit_price: Option<f64>,
    pub date_local: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResellerBalance {
    pub credits_bought: i64,
    pub credits_sold: i64,
    pub credits_available: i64,
    pub spent: f64,
    pub sold: f64,
    pub profit: f64,
}

const SELECT_COLUMNS: &str = "id, name, phone, email, server, buy_price, sell_price, total_sales, \
     is_active, notes, created_at, updated_at";

fn map_reseller(row: &Row<'_>) -> rusqlite::Result<Reseller> {
    let active: i64 = row.get(8)?;
    Ok(Reseller {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        server: row.get(4)?,
        buy_price: row.get(5)?,
        sell_price: row.get(6)?,
        total_sales: row.get(7)?,
        is_active: active != 0,
        notes: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn map_credit(row: &Row<'_>) -> rusqlite::Result<CreditTransaction> {
    Ok(CreditTransaction {
        id: row.get(0)?,
        reseller_id: row.get(1)?,
        kind: row.get(2)?,
        credits: row.get(3)?,
        unit_price: row.get(4)?,
        total: row.get(5)?,
        date_local: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn check_prices(input: &ResellerInput) -> CrmResult<()> {
    if input.buy_price < 0.0 || input.sell_price < 0.0 {
        return Err(CrmError::invalid("reseller prices cannot be negative"));
    }
    Ok(())
}

pub fn get_reseller(conn: &Connection, id: i64) -> CrmResult<Reseller> {
    conn.query_row(
        &format!("SELECT {} FROM resellers WHERE id = ?1", SELECT_COLUMNS),
        [id],
        map_reseller,
    )
    .optional()?
    .ok_or_else(|| CrmError::not_found("reseller", id))
}

pub fn list_resellers(conn: &Connection) -> CrmResult<Vec<Reseller>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM resellers ORDER BY name COLLATE NOCASE",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([], map_reseller)?;

    let mut resellers = Vec::new();
    for row in rows {
        resellers.push(row?);
    }
    Ok(resellers)
}

pub fn add_reseller(conn: &Connection, input: ResellerInput) -> CrmResult<Reseller> {
    check_prices(&input)?;
    let name = required("name", &input.name)?;
    conn.execute(
        "INSERT INTO resellers (name, phone, email, server, buy_price, sell_price, total_sales,
                                is_active, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)",
        params![
            name,
            clean(input.phone),
            clean(input.email),
            clean(input.server),
            input.buy_price,
            input.sell_price,
            input.is_active.unwrap_or(true),
            clean(input.notes),
            now_timestamp()
        ],
    )?;
    let id = conn.last_insert_rowid();

    system_log::append_best_effort(
        conn,
        &NewLogEntry::new(
            LogAction::ResellerAdded,
            "reseller",
            id,
            format!("Revendedor adicionado: {}", name),
        ),
    );
    get_reseller(conn, id)
}

/// Edits profile and prices. `total_sales` only moves through the ledger.
pub fn update_reseller(conn: &Connection, id: i64, input: ResellerInput) -> CrmResult<Reseller> {
    check_prices(&input)?;
    let current = get_reseller(conn, id)?;
    conn.execute(
        "UPDATE resellers SET name = ?1, phone = ?2, email = ?3, server = ?4, buy_price = ?5,
                sell_price = ?6, is_active = ?7, notes = ?8, updated_at = ?9
         WHERE id = ?10",
        params![
            required("name", &input.name)?,
            clean(input.phone),
            clean(input.email),
            clean(input.server),
            input.buy_price,
            input.sell_price,
            input.is_active.unwrap_or(current.is_active),
            clean(input.notes),
            now_timestamp(),
            id
        ],
    )?;
    get_reseller(conn, id)
}

/// Removes the reseller; its credit ledger goes with it through the foreign key.
pub fn delete_reseller(conn: &Connection, id: i64) -> CrmResult<()> {
    if conn.execute("DELETE FROM resellers WHERE id = ?1", [id])? == 0 {
        return Err(CrmError::not_found("reseller", id));
    }
    debug!(reseller_id = id, "reseller deleted");
    Ok(())
}

pub fn add_credit_transaction(
    conn: &mut Connection,
    input: NewCreditTransaction,
) -> CrmResult<CreditTransaction> {
    if input.credits <= 0 {
        return Err(CrmError::invalid("credits must be positive"));
    }
    let date_local = resolve_date_local(input.date_local)?;
    let tx = conn.transaction()?;

    let reseller = get_reseller(&tx, input.reseller_id)?;
    let unit_price = input.unit_price.unwrap_or(match input.kind {
        CreditKind::Purchase => reseller.buy_price,
        CreditKind::Sale => reseller.sell_price,
    });
    if unit_price < 0.0 {
        return Err(CrmError::invalid("unit price cannot be negative"));
    }
    let total = unit_price * input.credits as f64;

    tx.execute(
        "INSERT INTO credit_transactions (reseller_id, kind, credits, unit_price, total, date_local,
                                          notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            reseller.id,
            input.kind,
            input.credits,
            unit_price,
            total,
            date_local,
            clean(input.notes),
            now_timestamp()
        ],
    )?;
    let id = tx.last_insert_rowid();

    if input.kind == CreditKind::Sale {
        tx.execute(
            "UPDATE resellers SET total_sales = total_sales + ?1, updated_at = ?2 WHERE id = ?3",
            params![total, now_timestamp(), reseller.id],
        )?;
    }

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::CreditTransactionAdded,
            "reseller",
            reseller.id,
            format!(
                "Créditos ({}) para {}: {} x R$ {:.2}",
                input.kind, reseller.name, input.credits, unit_price
            ),
        )
        .with_metadata(serde_json::json!({ "creditTransactionId": id, "total": total })),
    )?;

    let transaction = tx.query_row(
        "SELECT id, reseller_id, kind, credits, unit_price, total, date_local, notes, created_at
         FROM credit_transactions WHERE id = ?1",
        [id],
        map_credit,
    )?;
    tx.commit()?;
    Ok(transaction)
}

pub fn list_credit_transactions(
    conn: &Connection,
    reseller_id: i64,
) -> CrmResult<Vec<CreditTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, reseller_id, kind, credits, unit_price, total, date_local, notes, created_at
         FROM credit_transactions WHERE reseller_id = ?1 ORDER BY date_local DESC, id DESC",
    )?;
    let rows = stmt.query_map([reseller_id], map_credit)?;

    let mut transactions = Vec::new();
    for row in rows {
        transactions.push(row?);
    }
    Ok(transactions)
}

pub fn reseller_balance(conn: &Connection, reseller_id: i64) -> CrmResult<ResellerBalance> {
    get_reseller(conn, reseller_id)?;
    let mut balance = ResellerBalance::default();
    for entry in list_credit_transactions(conn, reseller_id)? {
        match entry.kind {
            CreditKind::Purchase => {
                balance.credits_bought += entry.credits;
                balance.spent += entry.total;
            }
            CreditKind::Sale => {
                balance.credits_sold += entry.credits;
                balance.sold += entry.total;
            }
        }
    }
    balance.credits_available = balance.credits_bought - balance.credits_sold;
    balance.profit = balance.sold - balance.spent;
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn reseller(conn: &Connection) -> Reseller {
        add_reseller(
            conn,
            ResellerInput {
                name: "Revenda Norte".into(),
                buy_price: 8.0,
                sell_price: 15.0,
                ..ResellerInput::default()
            },
        )
        .unwrap()
    }

    fn credits(reseller_id: i64, kind: CreditKind, credits: i64) -> NewCreditTransaction {
        NewCreditTransaction {
            reseller_id,
            kind,
            credits,
            unit_price: None,
            date_local: Some("2025-06-01".into()),
            notes: None,
        }
    }

    #[test]
    fn sale_accumulates_total_sales() {
        let mut conn = db::open_in_memory().expect("db");
        let r = reseller(&conn);

        let purchase = add_credit_transaction(&mut conn, credits(r.id, CreditKind::Purchase, 10)).unwrap();
        assert_eq!(purchase.total, 80.0);
        assert_eq!(get_reseller(&conn, r.id).unwrap().total_sales, 0.0);

        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Sale, 4)).unwrap();
        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Sale, 2)).unwrap();
        assert_eq!(get_reseller(&conn, r.id).unwrap().total_sales, 90.0);
    }

    #[test]
    fn balance_nets_purchases_against_sales() {
        let mut conn = db::open_in_memory().expect("db");
        let r = reseller(&conn);
        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Purchase, 10)).unwrap();
        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Sale, 6)).unwrap();

        let balance = reseller_balance(&conn, r.id).unwrap();
        assert_eq!(balance.credits_available, 4);
        assert_eq!(balance.spent, 80.0);
        assert_eq!(balance.sold, 90.0);
        assert_eq!(balance.profit, 10.0);
    }

    #[test]
    fn rejects_non_positive_credits_and_unknown_reseller() {
        let mut conn = db::open_in_memory().expect("db");
        let r = reseller(&conn);
        assert!(matches!(
            add_credit_transaction(&mut conn, credits(r.id, CreditKind::Sale, 0)),
            Err(CrmError::Validation(_))
        ));
        assert!(matches!(
            add_credit_transaction(&mut conn, credits(999, CreditKind::Sale, 1)),
            Err(CrmError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_cascades_to_ledger() {
        let mut conn = db::open_in_memory().expect("db");
        let r = reseller(&conn);
        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Purchase, 3)).unwrap();

        delete_reseller(&conn, r.id).unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM credit_transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn update_does_not_touch_total_sales() {
        let mut conn = db::open_in_memory().expect("db");
        let r = reseller(&conn);
        add_credit_transaction(&mut conn, credits(r.id, CreditKind::Sale, 1)).unwrap();

        let updated = update_reseller(
            &conn,
            r.id,
            ResellerInput {
                name: "Revenda Sul".into(),
                buy_price: 7.0,
                sell_price: 14.0,
                is_active: Some(false),
                ..ResellerInput::default()
            },
        )
        .unwrap();
        assert_eq!(updated.name, "Revenda Sul");
        assert!(!updated.is_active);
        assert_eq!(updated.total_sales, 15.0);
    }
}

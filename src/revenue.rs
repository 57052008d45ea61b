//! Revenue bookkeeping: per-transaction cost snapshots, the
//! pending/committed/reverted lifecycle, and keeping a client's payment
//! status in step with its transaction history.
//!
//! Cost and plan duration are copied onto each row when it is written, so
//! later edits to the server or plan tables never rewrite past figures.

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clients::{self, Client, PaymentStatus};
use crate::error::{CrmError, CrmResult};
use crate::settings;
use crate::system_log::{self, LogAction, NewLogEntry};
use crate::{clean, now_timestamp, parse_date, resolve_date_local};

text_enum! {
    pub enum TransactionStatus {
        Committed => "committed",
        Pending => "pending",
        Reverted => "reverted",
    }
}

text_enum! {
    pub enum TransactionKind {
        Activation => "activation",
        Renewal => "renewal",
        Adjustment => "adjustment",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueTransaction {
    pub id: i64,
    pub client_id: i64,
    pub kind: TransactionKind,
    pub amount: f64,
    pub cost_snapshot: f64,
    pub base_cost_snapshot: f64,
    pub months_snapshot: i64,
    pub server_snapshot: Option<String>,
    pub plan_snapshot: Option<String>,
    /// False when the server name had no match and the cost fell back to zero.
    pub cost_resolved: bool,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub date_local: String,
    pub status: TransactionStatus,
    pub reversed_at: Option<String>,
    pub reversal_reason: Option<String>,
    pub created_at: String,
}

impl RevenueTransaction {
    pub fn profit(&self) -> f64 {
        self.amount - self.cost_snapshot
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevenueTransaction {
    pub client_id: i64,
    pub kind: TransactionKind,
    pub amount: f64,
    pub date_local: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub status: Option<TransactionStatus>,
}

/// Cost figures resolved from the reference tables at write time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSnapshot {
    pub base_cost: f64,
    pub months: i64,
    pub server_matched: bool,
    pub plan_matched: bool,
}

impl CostSnapshot {
    pub fn total(&self) -> f64 {
        self.base_cost * self.months as f64
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub client_id: Option<i64>,
    pub status: Option<TransactionStatus>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub client: Client,
    pub transaction: RevenueTransaction,
    /// True when a new renewal row was written, false when a pending one was committed.
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub gross: f64,
    pub cost: f64,
    pub net: f64,
    pub committed_count: i64,
    pub pending_count: i64,
    pub pending_amount: f64,
    pub reverted_count: i64,
}

const SELECT_COLUMNS: &str = "id, client_id, kind, amount, cost_snapshot, base_cost_snapshot, \
     months_snapshot, server_snapshot, plan_snapshot, cost_resolved, description, payment_method, \
     date_local, status, reversed_at, reversal_reason, created_at";

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<RevenueTransaction> {
    let cost_resolved: i64 = row.get(9)?;
    Ok(RevenueTransaction {
        id: row.get(0)?,
        client_id: row.get(1)?,
        kind: row.get(2)?,
        amount: row.get(3)?,
        cost_snapshot: row.get(4)?,
        base_cost_snapshot: row.get(5)?,
        months_snapshot: row.get(6)?,
        server_snapshot: row.get(7)?,
        plan_snapshot: row.get(8)?,
        cost_resolved: cost_resolved != 0,
        description: row.get(10)?,
        payment_method: row.get(11)?,
        date_local: row.get(12)?,
        status: row.get(13)?,
        reversed_at: row.get(14)?,
        reversal_reason: row.get(15)?,
        created_at: row.get(16)?,
    })
}

/// Looks up the server cost and plan duration by name. An unknown server
/// costs 0 and an unknown plan lasts one month; both are reported with
/// `warn!` because the resulting figures understate cost.
pub fn resolve_cost_snapshot(
    conn: &Connection,
    server: Option<&str>,
    plan: Option<&str>,
) -> CrmResult<CostSnapshot> {
    let base_cost = match server {
        Some(name) => settings::find_server_cost(conn, name)?,
        None => None,
    };
    if base_cost.is_none() {
        warn!(server = ?server, "server not found in settings, cost snapshot defaults to 0");
    }

    let months = match plan {
        Some(name) => settings::find_plan_months(conn, name)?,
        None => None,
    };
    if months.is_none() {
        warn!(plan = ?plan, "plan not found in settings, duration defaults to 1 month");
    }

    Ok(CostSnapshot {
        base_cost: base_cost.unwrap_or(0.0),
        months: months.unwrap_or(1),
        server_matched: base_cost.is_some(),
        plan_matched: months.is_some(),
    })
}

pub fn get_transaction(conn: &Connection, id: i64) -> CrmResult<RevenueTransaction> {
    conn.query_row(
        &format!("SELECT {} FROM revenue_transactions WHERE id = ?1", SELECT_COLUMNS),
        [id],
        map_transaction,
    )
    .optional()?
    .ok_or_else(|| CrmError::not_found("transaction", id))
}

pub fn list_transactions(
    conn: &Connection,
    filter: &TransactionFilter,
) -> CrmResult<Vec<RevenueTransaction>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(client_id) = filter.client_id {
        clauses.push("client_id = ?");
        values.push(Box::new(client_id));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status));
    }
    if let Some(from) = &filter.from {
        parse_date(from)?;
        clauses.push("date_local >= ?");
        values.push(Box::new(from.clone()));
    }
    if let Some(to) = &filter.to {
        parse_date(to)?;
        clauses.push("date_local <= ?");
        values.push(Box::new(to.clone()));
    }

    let mut sql = format!("SELECT {} FROM revenue_transactions", SELECT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY date_local DESC, id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
        map_transaction,
    )?;

    let mut transactions = Vec::new();
    for row in rows {
        transactions.push(row?);
    }
    Ok(transactions)
}

/// Inserts a row snapshotting the client's current server and plan.
/// Shared by [`add_transaction`] and [`confirm_payment`]; the caller owns
/// the surrounding SQL transaction, if any.
#[allow(clippy::too_many_arguments)]
fn insert_snapshot_row(
    conn: &Connection,
    client: &Client,
    kind: TransactionKind,
    amount: f64,
    date_local: &str,
    description: Option<&str>,
    payment_method: Option<&str>,
    status: TransactionStatus,
) -> CrmResult<i64> {
    let snapshot = resolve_cost_snapshot(conn, client.server.as_deref(), client.plan.as_deref())?;
    conn.execute(
        "INSERT INTO revenue_transactions (client_id, kind, amount, cost_snapshot, base_cost_snapshot,
                                           months_snapshot, server_snapshot, plan_snapshot, cost_resolved,
                                           description, payment_method, date_local, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            client.id,
            kind,
            amount,
            snapshot.total(),
            snapshot.base_cost,
            snapshot.months,
            client.server,
            client.plan,
            snapshot.server_matched,
            description,
            payment_method,
            date_local,
            status,
            now_timestamp()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_transaction(
    conn: &Connection,
    input: NewRevenueTransaction,
) -> CrmResult<RevenueTransaction> {
    if !input.amount.is_finite() {
        return Err(CrmError::invalid("amount must be a number"));
    }
    let client = clients::get_client(conn, input.client_id)?;
    let date_local = resolve_date_local(input.date_local)?;
    let description = clean(input.description);
    let payment_method = clean(input.payment_method);
    let status = input.status.unwrap_or(TransactionStatus::Committed);

    let id = insert_snapshot_row(
        conn,
        &client,
        input.kind,
        input.amount,
        &date_local,
        description.as_deref(),
        payment_method.as_deref(),
        status,
    )?;
    let transaction = get_transaction(conn, id)?;

    system_log::append_best_effort(
        conn,
        &NewLogEntry::new(
            LogAction::TransactionAdded,
            "transaction",
            id,
            format!(
                "Transação registrada: {} R$ {:.2} ({})",
                client.name, transaction.amount, transaction.status
            ),
        )
        .for_client(client.id)
        .with_metadata(serde_json::json!({
            "kind": transaction.kind,
            "amount": transaction.amount,
            "costSnapshot": transaction.cost_snapshot,
            "status": transaction.status,
        })),
    );
    debug!(transaction_id = id, client_id = client.id, status = %status, "revenue transaction added");

    Ok(transaction)
}

/// Marks the client paid and commits the matching renewal, all or nothing.
///
/// The newest pending renewal for the client is committed in place, which
/// makes confirming an already-announced renewal idempotent. Without one, a
/// new committed renewal is written at the client's current price.
pub fn confirm_payment(
    conn: &mut Connection,
    client_id: i64,
    payment_date: Option<String>,
) -> CrmResult<PaymentConfirmation> {
    let payment_date = resolve_date_local(payment_date)?;
    let tx = conn.transaction()?;

    let changed = tx.execute(
        "UPDATE clients SET payment_status = ?1, payment_date = ?2, updated_at = ?3 WHERE id = ?4",
        params![PaymentStatus::Paid, payment_date, now_timestamp(), client_id],
    )?;
    if changed == 0 {
        return Err(CrmError::not_found("client", client_id));
    }
    let client = clients::get_client(&tx, client_id)?;
    let description = format!("Renovação confirmada - {}", client.plan.as_deref().unwrap_or("sem plano"));

    let pending: Option<i64> = tx
        .query_row(
            "SELECT id FROM revenue_transactions
             WHERE client_id = ?1 AND kind = ?2 AND status = ?3
             ORDER BY id DESC LIMIT 1",
            params![client_id, TransactionKind::Renewal, TransactionStatus::Pending],
            |row| row.get(0),
        )
        .optional()?;

    let (transaction_id, created) = match pending {
        Some(id) => {
            tx.execute(
                "UPDATE revenue_transactions SET status = ?1, date_local = ?2, description = ?3
                 WHERE id = ?4",
                params![TransactionStatus::Committed, payment_date, description, id],
            )?;
            (id, false)
        }
        None => {
            let id = insert_snapshot_row(
                &tx,
                &client,
                TransactionKind::Renewal,
                client.price,
                &payment_date,
                Some(description.as_str()),
                client.payment_method.as_deref(),
                TransactionStatus::Committed,
            )?;
            (id, true)
        }
    };
    let transaction = get_transaction(&tx, transaction_id)?;

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::PaymentConfirmed,
            "client",
            client_id,
            format!(
                "Pagamento confirmado: {} R$ {:.2}",
                client.name, transaction.amount
            ),
        )
        .for_client(client_id)
        .with_metadata(serde_json::json!({
            "transactionId": transaction_id,
            "paymentDate": payment_date,
            "createdTransaction": created,
        })),
    )?;
    tx.commit()?;
    info!(client_id, transaction_id, created, "payment confirmed");

    Ok(PaymentConfirmation {
        client,
        transaction,
        created,
    })
}

/// Cancels a transaction while keeping the row for the audit trail.
pub fn revert_transaction(
    conn: &mut Connection,
    id: i64,
    reason: Option<String>,
) -> CrmResult<RevenueTransaction> {
    let reason = clean(reason);
    let tx = conn.transaction()?;

    let original = get_transaction(&tx, id)?;
    if original.status == TransactionStatus::Reverted {
        return Err(CrmError::invalid(format!("transaction {} is already reverted", id)));
    }
    let client_name: Option<String> = tx
        .query_row(
            "SELECT name FROM clients WHERE id = ?1",
            [original.client_id],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "UPDATE revenue_transactions SET status = ?1, reversed_at = ?2, reversal_reason = ?3
         WHERE id = ?4",
        params![TransactionStatus::Reverted, now_timestamp(), reason, id],
    )?;

    system_log::append(
        &tx,
        &NewLogEntry::new(
            LogAction::TransactionReverted,
            "transaction",
            id,
            format!(
                "Transação estornada: {} R$ {:.2}",
                client_name.as_deref().unwrap_or("cliente desconhecido"),
                original.amount
            ),
        )
        .for_client(original.client_id)
        .with_metadata(serde_json::json!({
            "previousStatus": original.status,
            "amount": original.amount,
            "reason": reason,
        })),
    )?;
    let reverted = get_transaction(&tx, id)?;
    tx.commit()?;
    info!(transaction_id = id, "transaction reverted");

    Ok(reverted)
}

/// Totals over an optional inclusive date range. Gross, cost and net only
/// count committed rows.
pub fn revenue_summary(
    conn: &Connection,
    from: Option<&str>,
    to: Option<&str>,
) -> CrmResult<RevenueSummary> {
    let filter = TransactionFilter {
        from: from.map(str::to_string),
        to: to.map(str::to_string),
        ..TransactionFilter::default()
    };
    let mut summary = RevenueSummary::default();
    for transaction in list_transactions(conn, &filter)? {
        match transaction.status {
            TransactionStatus::Committed => {
                summary.committed_count += 1;
                summary.gross += transaction.amount;
                summary.cost += transaction.cost_snapshot;
            }
            TransactionStatus::Pending => {
                summary.pending_count += 1;
                summary.pending_amount += transaction.amount;
            }
            TransactionStatus::Reverted => summary.reverted_count += 1,
        }
    }
    summary.net = summary.gross - summary.cost;
    Ok(summary)
}

/// Monthly recurring revenue: each active client's price spread over its
/// plan duration.
pub fn monthly_recurring_revenue(conn: &Connection) -> CrmResult<f64> {
    let mut total = 0.0;
    for client in clients::list_clients(conn, false)? {
        if client.situation != clients::ClientSituation::Active {
            continue;
        }
        let months = match client.plan.as_deref() {
            Some(plan) => settings::find_plan_months(conn, plan)?.unwrap_or(1),
            None => 1,
        };
        total += client.price / months.max(1) as f64;
    }
    Ok(total)
}

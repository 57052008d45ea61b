//! Tauri command surface: one command per operation the webview invokes.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Local, Utc};
use rusqlite::Connection;
use tauri::{AppHandle, Manager, State};
use tauri_plugin_opener::OpenerExt;
use tracing::{info, warn};

use crate::clients::{self, Client, ClientInput};
use crate::config::AppConfig;
use crate::error::{CrmError, CrmResult};
use crate::leads::{self, Lead, LeadInput};
use crate::resellers::{
    self, CreditTransaction, NewCreditTransaction, Reseller, ResellerBalance, ResellerInput,
};
use crate::revenue::{
    self, NewRevenueTransaction, PaymentConfirmation, RevenueSummary, RevenueTransaction,
    TransactionFilter,
};
use crate::settings::{
    self, LookupInput, LookupItem, LookupList, Plan, PlanInput, Server, ServerInput, Settings,
};
use crate::system_log::{self, SystemLogEntry};
use crate::trials::{self, Trial, TrialInput};
use crate::{db, logging, report, DATE_FORMAT};

pub struct AppState {
    conn: Mutex<Connection>,
    report_dir: PathBuf,
}

fn with_conn<T>(
    state: &State<'_, AppState>,
    f: impl FnOnce(&mut Connection) -> CrmResult<T>,
) -> CrmResult<T> {
    let mut conn = state.conn.lock().map_err(|_| CrmError::LockPoisoned)?;
    f(&mut *conn)
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_clients(
    state: State<'_, AppState>,
    include_archived: Option<bool>,
) -> Result<Vec<Client>, CrmError> {
    with_conn(&state, |conn| {
        clients::list_clients(conn, include_archived.unwrap_or(false))
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_client(state: State<'_, AppState>, id: i64) -> Result<Client, CrmError> {
    with_conn(&state, |conn| clients::get_client(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_client(state: State<'_, AppState>, client: ClientInput) -> Result<Client, CrmError> {
    with_conn(&state, |conn| clients::add_client(conn, client))
}

#[tauri::command(rename_all = "snake_case")]
fn db_update_client(
    state: State<'_, AppState>,
    id: i64,
    client: ClientInput,
) -> Result<Client, CrmError> {
    with_conn(&state, |conn| clients::update_client(conn, id, client))
}

#[tauri::command(rename_all = "snake_case")]
fn db_delete_client(state: State<'_, AppState>, id: i64) -> Result<Client, CrmError> {
    with_conn(&state, |conn| clients::delete_client(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_restore_client(state: State<'_, AppState>, id: i64) -> Result<Client, CrmError> {
    with_conn(&state, |conn| clients::restore_client(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_expiring_clients(
    state: State<'_, AppState>,
    within_days: Option<i64>,
) -> Result<Vec<Client>, CrmError> {
    let today = Local::now().format(DATE_FORMAT).to_string();
    with_conn(&state, |conn| {
        clients::list_expiring(conn, &today, within_days.unwrap_or(7))
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_confirm_payment(
    state: State<'_, AppState>,
    client_id: i64,
    payment_date: Option<String>,
) -> Result<PaymentConfirmation, CrmError> {
    with_conn(&state, |conn| {
        revenue::confirm_payment(conn, client_id, payment_date)
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_transaction(
    state: State<'_, AppState>,
    transaction: NewRevenueTransaction,
) -> Result<RevenueTransaction, CrmError> {
    with_conn(&state, |conn| revenue::add_transaction(conn, transaction))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_transactions(
    state: State<'_, AppState>,
    filter: Option<TransactionFilter>,
) -> Result<Vec<RevenueTransaction>, CrmError> {
    let filter = filter.unwrap_or_default();
    with_conn(&state, |conn| revenue::list_transactions(conn, &filter))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_transaction(state: State<'_, AppState>, id: i64) -> Result<RevenueTransaction, CrmError> {
    with_conn(&state, |conn| revenue::get_transaction(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_revert_transaction(
    state: State<'_, AppState>,
    id: i64,
    reason: Option<String>,
) -> Result<RevenueTransaction, CrmError> {
    with_conn(&state, |conn| revenue::revert_transaction(conn, id, reason))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_revenue_summary(
    state: State<'_, AppState>,
    from: Option<String>,
    to: Option<String>,
) -> Result<RevenueSummary, CrmError> {
    with_conn(&state, |conn| {
        revenue::revenue_summary(conn, from.as_deref(), to.as_deref())
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_mrr(state: State<'_, AppState>) -> Result<f64, CrmError> {
    with_conn(&state, |conn| revenue::monthly_recurring_revenue(conn))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_leads(state: State<'_, AppState>) -> Result<Vec<Lead>, CrmError> {
    with_conn(&state, |conn| leads::list_leads(conn))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_lead(state: State<'_, AppState>, id: i64) -> Result<Lead, CrmError> {
    with_conn(&state, |conn| leads::get_lead(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_lead(state: State<'_, AppState>, lead: LeadInput) -> Result<Lead, CrmError> {
    with_conn(&state, |conn| leads::add_lead(conn, lead))
}

#[tauri::command(rename_all = "snake_case")]
fn db_update_lead(state: State<'_, AppState>, id: i64, lead: LeadInput) -> Result<Lead, CrmError> {
    with_conn(&state, |conn| leads::update_lead(conn, id, lead))
}

#[tauri::command(rename_all = "snake_case")]
fn db_delete_lead(state: State<'_, AppState>, id: i64) -> Result<(), CrmError> {
    with_conn(&state, |conn| leads::delete_lead(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_migrate_client_to_lead(
    state: State<'_, AppState>,
    client_id: i64,
    reason: Option<String>,
) -> Result<Lead, CrmError> {
    with_conn(&state, |conn| {
        leads::migrate_client_to_lead(conn, client_id, reason)
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_convert_lead(
    state: State<'_, AppState>,
    lead_id: i64,
    client: ClientInput,
) -> Result<Client, CrmError> {
    with_conn(&state, |conn| {
        leads::convert_lead_to_client(conn, lead_id, client)
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_tests(state: State<'_, AppState>) -> Result<Vec<Trial>, CrmError> {
    with_conn(&state, |conn| trials::list_tests(conn))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_test(state: State<'_, AppState>, id: i64) -> Result<Trial, CrmError> {
    with_conn(&state, |conn| trials::get_test(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_active_tests(state: State<'_, AppState>) -> Result<Vec<Trial>, CrmError> {
    with_conn(&state, |conn| {
        trials::list_active_tests(conn, Utc::now().naive_utc())
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_test(state: State<'_, AppState>, test: TrialInput) -> Result<Trial, CrmError> {
    with_conn(&state, |conn| trials::add_test(conn, test))
}

#[tauri::command(rename_all = "snake_case")]
fn db_update_test(
    state: State<'_, AppState>,
    id: i64,
    test: TrialInput,
) -> Result<Trial, CrmError> {
    with_conn(&state, |conn| trials::update_test(conn, id, test))
}

#[tauri::command(rename_all = "snake_case")]
fn db_delete_test(state: State<'_, AppState>, id: i64) -> Result<(), CrmError> {
    with_conn(&state, |conn| trials::delete_test(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_resellers(state: State<'_, AppState>) -> Result<Vec<Reseller>, CrmError> {
    with_conn(&state, |conn| resellers::list_resellers(conn))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_reseller(state: State<'_, AppState>, id: i64) -> Result<Reseller, CrmError> {
    with_conn(&state, |conn| resellers::get_reseller(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_reseller(
    state: State<'_, AppState>,
    reseller: ResellerInput,
) -> Result<Reseller, CrmError> {
    with_conn(&state, |conn| resellers::add_reseller(conn, reseller))
}

#[tauri::command(rename_all = "snake_case")]
fn db_update_reseller(
    state: State<'_, AppState>,
    id: i64,
    reseller: ResellerInput,
) -> Result<Reseller, CrmError> {
    with_conn(&state, |conn| resellers::update_reseller(conn, id, reseller))
}

#[tauri::command(rename_all = "snake_case")]
fn db_delete_reseller(state: State<'_, AppState>, id: i64) -> Result<(), CrmError> {
    with_conn(&state, |conn| resellers::delete_reseller(conn, id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_add_credit_transaction(
    state: State<'_, AppState>,
    transaction: NewCreditTransaction,
) -> Result<CreditTransaction, CrmError> {
    with_conn(&state, |conn| {
        resellers::add_credit_transaction(conn, transaction)
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_credit_transactions(
    state: State<'_, AppState>,
    reseller_id: i64,
) -> Result<Vec<CreditTransaction>, CrmError> {
    with_conn(&state, |conn| {
        resellers::list_credit_transactions(conn, reseller_id)
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_reseller_balance(
    state: State<'_, AppState>,
    reseller_id: i64,
) -> Result<ResellerBalance, CrmError> {
    with_conn(&state, |conn| resellers::reseller_balance(conn, reseller_id))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_settings(state: State<'_, AppState>) -> Result<Settings, CrmError> {
    with_conn(&state, |conn| settings::get_settings(conn))
}

#[tauri::command(rename_all = "snake_case")]
fn db_save_plans(
    state: State<'_, AppState>,
    plans: Vec<PlanInput>,
) -> Result<Vec<Plan>, CrmError> {
    with_conn(&state, |conn| settings::save_plans(conn, &plans))
}

#[tauri::command(rename_all = "snake_case")]
fn db_save_servers(
    state: State<'_, AppState>,
    servers: Vec<ServerInput>,
) -> Result<Vec<Server>, CrmError> {
    with_conn(&state, |conn| settings::save_servers(conn, &servers))
}

#[tauri::command(rename_all = "snake_case")]
fn db_save_lookup(
    state: State<'_, AppState>,
    list: LookupList,
    items: Vec<LookupInput>,
) -> Result<Vec<LookupItem>, CrmError> {
    with_conn(&state, |conn| settings::save_lookup(conn, list, &items))
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_system_log(
    state: State<'_, AppState>,
    limit: Option<u32>,
) -> Result<Vec<SystemLogEntry>, CrmError> {
    with_conn(&state, |conn| {
        system_log::list_recent(conn, limit.unwrap_or(200))
    })
}

#[tauri::command(rename_all = "snake_case")]
fn db_get_client_log(
    state: State<'_, AppState>,
    client_id: i64,
) -> Result<Vec<SystemLogEntry>, CrmError> {
    with_conn(&state, |conn| system_log::list_for_client(conn, client_id))
}

#[tauri::command(rename_all = "snake_case")]
fn generate_clients_report(app: AppHandle, state: State<'_, AppState>) -> Result<String, CrmError> {
    let path = with_conn(&state, |conn| {
        report::export_clients_report(conn, &state.report_dir)
    })?;
    let path = path.display().to_string();
    if let Err(err) = app.opener().open_path(path.clone(), None::<&str>) {
        warn!(error = %err, "could not open client report");
    }
    Ok(path)
}

pub(crate) fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let config = AppConfig::load(None)?;
            logging::init_tracing(&config.log_level);

            let documents = app.path().document_dir().ok();
            let db_path = config.database_path(documents.as_deref());
            info!(path = %db_path.display(), "opening database");
            let conn = db::open_connection(&db_path)?;
            db::init_db(&conn)?;

            app.manage(AppState {
                conn: Mutex::new(conn),
                report_dir: config.report_dir(documents.as_deref()),
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            db_get_clients,
            db_get_client,
            db_add_client,
            db_update_client,
            db_delete_client,
            db_restore_client,
            db_get_expiring_clients,
            db_confirm_payment,
            db_add_transaction,
            db_get_transactions,
            db_get_transaction,
            db_revert_transaction,
            db_get_revenue_summary,
            db_get_mrr,
            db_get_leads,
            db_get_lead,
            db_add_lead,
            db_update_lead,
            db_delete_lead,
            db_migrate_client_to_lead,
            db_convert_lead,
            db_get_tests,
            db_get_test,
            db_get_active_tests,
            db_add_test,
            db_update_test,
            db_delete_test,
            db_get_resellers,
            db_get_reseller,
            db_add_reseller,
            db_update_reseller,
            db_delete_reseller,
            db_add_credit_transaction,
            db_get_credit_transactions,
            db_get_reseller_balance,
            db_get_settings,
            db_save_plans,
            db_save_servers,
            db_save_lookup,
            db_get_system_log,
            db_get_client_log,
            generate_clients_report
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

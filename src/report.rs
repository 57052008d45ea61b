//! Printable client report. The desktop shell hands the HTML file to the
//! system viewer, which prints it to PDF.

use std::{fs, path::Path, path::PathBuf};

use chrono::Local;
use rusqlite::Connection;
use tracing::info;

use crate::clients::{self, Client};
use crate::error::CrmResult;

/// The report is one fixed table, so it is built with `format!` rather
/// than a template engine; every field goes through here.
fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn cell(value: Option<&str>) -> String {
    escape_html(value.unwrap_or("-"))
}

fn brl(value: f64) -> String {
    format!("R$ {:.2}", value).replace('.', ",")
}

pub fn render_clients_report(clients: &[Client], generated_at: &str) -> String {
    let mut rows = String::new();
    let mut total = 0.0;
    for client in clients.iter().filter(|c| !c.archived) {
        total += client.price;
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&client.name),
            cell(client.phone.as_deref()),
            cell(client.plan.as_deref()),
            cell(client.server.as_deref()),
            brl(client.price),
            cell(client.expiry_date.as_deref()),
            client.payment_status,
            client.situation,
        ));
    }
    let count = clients.iter().filter(|c| !c.archived).count();

    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
<meta charset="utf-8">
<title>Relatório de Clientes</title>
<style>
body {{ font-family: Arial, sans-serif; font-size: 12px; color: #111; }}
h1 {{ font-size: 18px; margin-bottom: 4px; }}
table {{ width: 100%; border-collapse: collapse; margin-top: 12px; }}
th, td {{ border: 1px solid #999; padding: 4px 6px; text-align: left; }}
th {{ background: #eee; }}
tfoot td {{ font-weight: bold; }}
</style>
</head>
<body>
<h1>Relatório de Clientes</h1>
<p>Gerado em {generated_at}</p>
<table>
<thead><tr><th>Nome</th><th>Telefone</th><th>Plano</th><th>Servidor</th><th>Valor</th><th>Vencimento</th><th>Pagamento</th><th>Situação</th></tr></thead>
<tbody>
{rows}</tbody>
<tfoot><tr><td colspan="4">Total de clientes: {count}</td><td colspan="4">{total}</td></tr></tfoot>
</table>
</body>
</html>
"#,
        generated_at = escape_html(generated_at),
        rows = rows,
        count = count,
        total = brl(total),
    )
}

/// Writes the report for every non-archived client into `dir` and returns its path.
pub fn export_clients_report(conn: &Connection, dir: &Path) -> CrmResult<PathBuf> {
    let clients = clients::list_clients(conn, false)?;
    let now = Local::now();
    let html = render_clients_report(&clients, &now.format("%d/%m/%Y %H:%M").to_string());

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("clientes-{}.html", now.format("%Y%m%d-%H%M%S")));
    fs::write(&path, html)?;
    info!(path = %path.display(), clients = clients.len(), "client report written");
    Ok(path)
}

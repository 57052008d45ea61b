//! Dumps the CRM database as SQL `INSERT` statements.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use iptv_crm_lib::config::AppConfig;
use iptv_crm_lib::{db, export, logging, CrmResult};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crm-export")]
#[command(about = "Export the CRM database as SQL INSERT statements", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file (defaults to the configured location)
    #[arg(short, long, env = "IPTV_CRM_DB")]
    db: Option<PathBuf>,

    /// Configuration file (defaults to ./crm.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Table to export; repeat for several (all tables when omitted)
    #[arg(short, long = "table")]
    tables: Vec<String>,
}

fn run(cli: Cli) -> CrmResult<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init_tracing(&config.log_level);

    let db_path = cli.db.unwrap_or_else(|| config.database_path(None));
    info!(path = %db_path.display(), "opening database");
    let conn = db::open_read_only(&db_path)?;

    let tables = if cli.tables.is_empty() {
        export::all_tables()
    } else {
        cli.tables
    };

    let rows = match cli.out {
        Some(path) => {
            let mut out = BufWriter::new(File::create(&path)?);
            let rows = export::export_tables(&conn, &tables, &mut out)?;
            out.flush()?;
            info!(path = %path.display(), "export written");
            rows
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            export::export_tables(&conn, &tables, &mut out)?
        }
    };
    info!(rows, tables = tables.len(), "export finished");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "export failed");
            eprintln!("crm-export: {}", err);
            ExitCode::FAILURE
        }
    }
}

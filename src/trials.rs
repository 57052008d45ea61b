//! Free trial lines handed to prospects (the `tests` table).

use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{CrmError, CrmResult};
use crate::system_log::{self, LogAction, NewLogEntry};
use crate::{clean, now_timestamp, parse_timestamp, required, TIMESTAMP_FORMAT};

pub const DEFAULT_DURATION_HOURS: i64 = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub server: Option<String>,
    pub device: Option<String>,
    pub application: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub start_at: String,
    pub end_at: String,
    pub duration_hours: i64,
    pub notes: Option<String>,
    pub created_at: String,
}

impl Trial {
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        match (parse_timestamp(&self.start_at), parse_timestamp(&self.end_at)) {
            (Ok(start), Ok(end)) => start <= now && now < end,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialInput {
    pub name: String,
    pub phone: Option<String>,
    pub server: Option<String>,
    pub device: Option<String>,
    pub application: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS`; now when omitted.
    pub start_at: Option<String>,
    pub duration_hours: Option<i64>,
    pub notes: Option<String>,
}

struct Window {
    start_at: String,
    end_at: String,
    duration_hours: i64,
}

fn trial_window(start_at: Option<String>, duration_hours: Option<i64>) -> CrmResult<Window> {
    let duration_hours = duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
    if duration_hours <= 0 {
        return Err(CrmError::invalid("trial duration must be positive"));
    }
    let start = match clean(start_at) {
        Some(ts) => parse_timestamp(&ts)?,
        None => Utc::now().naive_utc(),
    };
    let end = Duration::try_hours(duration_hours)
        .and_then(|length| start.checked_add_signed(length))
        .ok_or_else(|| {
            CrmError::invalid(format!("trial duration too large: {} hours", duration_hours))
        })?;
    Ok(Window {
        start_at: start.format(TIMESTAMP_FORMAT).to_string(),
        end_at: end.format(TIMESTAMP_FORMAT).to_string(),
        duration_hours,
    })
}

const SELECT_COLUMNS: &str = "id, name, phone, server, device, application, username, password, \
     start_at, end_at, duration_hours, notes, created_at";

fn map_trial(row: &Row<'_>) -> rusqlite::Result<Trial> {
    Ok(Trial {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        server: row.get(3)?,
        device: row.get(4)?,
        application: row.get(5)?,
        username: row.get(6)?,
        password: row.get(7)?,
        start_at: row.get(8)?,
        end_at: row.get(9)?,
        duration_hours: row.get(10)?,
        notes: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub fn get_test(conn: &Connection, id: i64) -> CrmResult<Trial> {
    conn.query_row(
        &format!("SELECT {} FROM tests WHERE id = ?1", SELECT_COLUMNS),
        [id],
        map_trial,
    )
    .optional()?
    .ok_or_else(|| CrmError::not_found("test", id))
}

pub fn list_tests(conn: &Connection) -> CrmResult<Vec<Trial>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tests ORDER BY start_at DESC, id DESC",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([], map_trial)?;

    let mut trials = Vec::new();
    for row in rows {
        trials.push(row?);
    }
    Ok(trials)
}

pub fn list_active_tests(conn: &Connection, now: NaiveDateTime) -> CrmResult<Vec<Trial>> {
    let now = now.format(TIMESTAMP_FORMAT).to_string();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tests WHERE start_at <= ?1 AND end_at > ?1 ORDER BY end_at",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map([now], map_trial)?;

    let mut trials = Vec::new();
    for row in rows {
        trials.push(row?);
    }
    Ok(trials)
}

pub fn add_test(conn: &Connection, input: TrialInput) -> CrmResult<Trial> {
    let name = required("name", &input.name)?;
    let window = trial_window(input.start_at, input.duration_hours)?;
    conn.execute(
        "INSERT INTO tests (name, phone, server, device, application, username, password,
                            start_at, end_at, duration_hours, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            name,
            clean(input.phone),
            clean(input.server),
            clean(input.device),
            clean(input.application),
            clean(input.username),
            clean(input.password),
            window.start_at,
            window.end_at,
            window.duration_hours,
            clean(input.notes),
            now_timestamp()
        ],
    )?;
    let id = conn.last_insert_rowid();

    system_log::append_best_effort(
        conn,
        &NewLogEntry::new(
            LogAction::TestAdded,
            "test",
            id,
            format!("Teste criado: {} ({}h)", name, window.duration_hours),
        ),
    );
    get_test(conn, id)
}

pub fn update_test(conn: &Connection, id: i64, input: TrialInput) -> CrmResult<Trial> {
    let current = get_test(conn, id)?;
    let name = required("name", &input.name)?;
    let window = trial_window(
        input.start_at.or(Some(current.start_at)),
        input.duration_hours.or(Some(current.duration_hours)),
    )?;
    conn.execute(
        "UPDATE tests SET name = ?1, phone = ?2, server = ?3, device = ?4, application = ?5,
                username = ?6, password = ?7, start_at = ?8, end_at = ?9, duration_hours = ?10,
                notes = ?11
         WHERE id = ?12",
        params![
            name,
            clean(input.phone),
            clean(input.server),
            clean(input.device),
            clean(input.application),
            clean(input.username),
            clean(input.password),
            window.start_at,
            window.end_at,
            window.duration_hours,
            clean(input.notes),
            id
        ],
    )?;
    get_test(conn, id)
}

/// Hard delete; trial log rows are left in place.
pub fn delete_test(conn: &Connection, id: i64) -> CrmResult<()> {
    if conn.execute("DELETE FROM tests WHERE id = ?1", [id])? == 0 {
        return Err(CrmError::not_found("test", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn trial(start_at: &str, hours: Option<i64>) -> TrialInput {
        TrialInput {
            name: "Ana".to_string(),
            server: Some("BLAZE".to_string()),
            start_at: Some(start_at.to_string()),
            duration_hours: hours,
            ..TrialInput::default()
        }
    }

    fn at(ts: &str) -> NaiveDateTime {
        parse_timestamp(ts).unwrap()
    }

    #[test]
    fn end_is_start_plus_duration() {
        let conn = db::open_in_memory().expect("db");
        let test = add_test(&conn, trial("2025-06-01 22:00:00", Some(6))).unwrap();
        assert_eq!(test.end_at, "2025-06-02 04:00:00");
        assert_eq!(test.duration_hours, 6);
    }

    #[test]
    fn default_duration_applies() {
        let conn = db::open_in_memory().expect("db");
        let test = add_test(&conn, trial("2025-06-01 10:00:00", None)).unwrap();
        assert_eq!(test.duration_hours, DEFAULT_DURATION_HOURS);
        assert_eq!(test.end_at, "2025-06-01 14:00:00");
    }

    #[test]
    fn rejects_bad_input() {
        let conn = db::open_in_memory().expect("db");
        assert!(add_test(&conn, trial("2025-06-01 10:00:00", Some(0))).is_err());
        assert!(add_test(&conn, trial("01/06/2025", None)).is_err());
    }

    #[test]
    fn oversized_duration_is_rejected() {
        let conn = db::open_in_memory().expect("db");
        let err = add_test(&conn, trial("2025-06-01 10:00:00", Some(i64::MAX / 1000))).unwrap_err();
        assert!(matches!(err, CrmError::Validation(_)));
        assert!(list_tests(&conn).unwrap().is_empty());

        let test = add_test(&conn, trial("2025-06-01 10:00:00", None)).unwrap();
        assert!(update_test(&conn, test.id, trial("2025-06-01 10:00:00", Some(i64::MAX))).is_err());
        assert_eq!(get_test(&conn, test.id).unwrap().duration_hours, DEFAULT_DURATION_HOURS);
    }

    #[test]
    fn active_window_excludes_finished_trials() {
        let conn = db::open_in_memory().expect("db");
        add_test(&conn, trial("2025-06-01 08:00:00", Some(4))).unwrap();
        let running = add_test(&conn, trial("2025-06-01 11:00:00", Some(4))).unwrap();

        let active = list_active_tests(&conn, at("2025-06-01 12:30:00")).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
        assert!(running.is_active_at(at("2025-06-01 12:30:00")));
        assert!(!running.is_active_at(at("2025-06-01 15:00:00")));
    }

    #[test]
    fn update_recomputes_window() {
        let conn = db::open_in_memory().expect("db");
        let test = add_test(&conn, trial("2025-06-01 10:00:00", Some(4))).unwrap();
        let mut edit = trial("2025-06-01 10:00:00", Some(24));
        edit.start_at = None;

        let updated = update_test(&conn, test.id, edit).unwrap();
        assert_eq!(updated.start_at, "2025-06-01 10:00:00");
        assert_eq!(updated.end_at, "2025-06-02 10:00:00");
    }

    #[test]
    fn delete_is_permanent() {
        let conn = db::open_in_memory().expect("db");
        let test = add_test(&conn, trial("2025-06-01 10:00:00", None)).unwrap();
        delete_test(&conn, test.id).unwrap();
        assert!(list_tests(&conn).unwrap().is_empty());
        assert!(matches!(delete_test(&conn, test.id), Err(CrmError::NotFound { .. })));
    }
}

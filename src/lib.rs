#[macro_use]
mod macros;

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod leads;
pub mod logging;
pub mod report;
pub mod resellers;
pub mod revenue;
pub mod settings;
pub mod system_log;
pub mod trials;

#[cfg(feature = "desktop")]
mod commands;

use chrono::{Local, NaiveDate, NaiveDateTime, Utc};

pub use error::{CrmError, CrmResult};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Uses the given `YYYY-MM-DD` date or falls back to today's local date.
pub(crate) fn resolve_date_local(date_local: Option<String>) -> CrmResult<String> {
    match date_local.map(|d| d.trim().to_string()) {
        Some(date) if !date.is_empty() => {
            parse_date(&date)?;
            Ok(date)
        }
        _ => Ok(Local::now().format(DATE_FORMAT).to_string()),
    }
}

pub(crate) fn parse_date(date: &str) -> CrmResult<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|err| CrmError::invalid(format!("invalid date {:?}: {}", date, err)))
}

pub(crate) fn parse_timestamp(ts: &str) -> CrmResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .map_err(|err| CrmError::invalid(format!("invalid timestamp {:?}: {}", ts, err)))
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Trims and drops empty strings coming from form fields.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn required(field: &str, value: &str) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CrmError::invalid(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    commands::run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_date_defaults_to_today() {
        let today = Local::now().format(DATE_FORMAT).to_string();
        assert_eq!(resolve_date_local(None).unwrap(), today);
        assert_eq!(resolve_date_local(Some("  ".into())).unwrap(), today);
        assert_eq!(
            resolve_date_local(Some("2025-03-01".into())).unwrap(),
            "2025-03-01"
        );
    }

    #[test]
    fn resolve_date_rejects_garbage() {
        assert!(matches!(
            resolve_date_local(Some("01/03/2025".into())),
            Err(CrmError::Validation(_))
        ));
    }

    #[test]
    fn clean_drops_blank_values() {
        assert_eq!(clean(Some("  BLAZE ".into())), Some("BLAZE".to_string()));
        assert_eq!(clean(Some("   ".into())), None);
        assert_eq!(clean(None), None);
    }
}

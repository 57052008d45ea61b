use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::db::{DATA_DIR_NAME, DB_FILE_NAME};
use crate::error::CrmResult;

const ENV_PREFIX: &str = "IPTV_CRM";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Folder holding the database and reports. Defaults to
    /// `<Documents>/CyberpunkIPTV`.
    pub data_dir: Option<PathBuf>,
    pub database_file: String,
    /// Where client reports are written; the data folder when unset.
    pub report_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: DB_FILE_NAME.to_string(),
            report_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `crm.toml` from the working directory (or `file` when
    /// given, which must exist), then `IPTV_CRM__*` environment variables.
    pub fn load(file: Option<&Path>) -> CrmResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ::config::Config::builder()
            .set_default("database_file", defaults.database_file)?
            .set_default("log_level", defaults.log_level)?;

        builder = match file {
            Some(path) => builder.add_source(::config::File::from(path).required(true)),
            None => builder.add_source(::config::File::with_name("crm").required(false)),
        };

        let config = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Resolves the data folder. `documents_dir` comes from the desktop
    /// shell; without it the home directory's `Documents` is used.
    pub fn data_dir(&self, documents_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let documents = documents_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(default_documents_dir);
        documents.join(DATA_DIR_NAME)
    }

    pub fn database_path(&self, documents_dir: Option<&Path>) -> PathBuf {
        self.data_dir(documents_dir).join(&self.database_file)
    }

    pub fn report_dir(&self, documents_dir: Option<&Path>) -> PathBuf {
        self.report_dir
            .clone()
            .unwrap_or_else(|| self.data_dir(documents_dir))
    }
}

fn default_documents_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_defaults_under_documents() {
        let config = AppConfig::default();
        let docs = Path::new("/home/ana/Documents");
        assert_eq!(
            config.database_path(Some(docs)),
            docs.join("CyberpunkIPTV").join("cyberpunk-iptv.db")
        );
        assert_eq!(config.report_dir(Some(docs)), docs.join("CyberpunkIPTV"));
    }

    #[test]
    fn loads_overrides_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crm.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/crm\"\ndatabase_file = \"test.db\"\nlog_level = \"debug\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.database_path(None), PathBuf::from("/srv/crm/test.db"));
        assert!(config.report_dir.is_none());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}

//! Error type shared by every repository function and Tauri command.

use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("phone number {phone} already belongs to lead {existing_id}")]
    DuplicatePhone { phone: String, existing_id: i64 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl CrmError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        CrmError::NotFound { entity, id }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CrmError::Validation(message.into())
    }
}

// The webview only needs the message.
impl Serialize for CrmError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub type CrmResult<T> = Result<T, CrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_message() {
        let err = CrmError::not_found("client", 7);
        let json = serde_json::to_string(&err).expect("serialize");
        assert_eq!(json, "\"client not found: 7\"");
    }
}

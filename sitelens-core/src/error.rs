use sitelens_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Run {0} is finalized and can no longer be updated")]
    RunFinalized(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, AuditError>;

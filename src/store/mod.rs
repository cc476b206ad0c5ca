//! Durable per-resource status, behind one interface for every backend.

pub mod file;
pub mod memory;
pub mod schema;
pub mod sheets;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::models::{Status, StatusKey, StatusRecord};
use crate::utils::now_local;

pub use file::{FileFormat, FileStore};
pub use memory::MemoryStore;
pub use sheets::SheetsStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected sheet layout: {0}")]
    Schema(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &str;

    /// The stored record for `key`, or `None` if the key was never observed.
    async fn get_previous(&self, key: &StatusKey) -> Result<Option<StatusRecord>, StoreError>;

    /// Records an observation and returns the row as written.
    ///
    /// `previous_status` becomes the stored status (unknown for a new key) and
    /// the `*_since` stamps follow [`StatusRecord::apply`].
    async fn upsert(
        &self,
        key: &StatusKey,
        status: Status,
        value: &str,
    ) -> Result<StatusRecord, StoreError>;
}

/// Stand-in used when the configured backend cannot be opened.
///
/// Reads find nothing and writes are dropped, so a run against it reports
/// every resource as first seen instead of failing.
pub struct DegradedStore {
    reason: String,
}

impl DegradedStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl StateStore for DegradedStore {
    fn backend(&self) -> &str {
        "degraded"
    }

    async fn get_previous(&self, _key: &StatusKey) -> Result<Option<StatusRecord>, StoreError> {
        Ok(None)
    }

    async fn upsert(
        &self,
        key: &StatusKey,
        status: Status,
        value: &str,
    ) -> Result<StatusRecord, StoreError> {
        debug!("Skipping write for {} ({}): {}", key, status, self.reason);
        Ok(StatusRecord::apply(None, key, status, value, now_local()))
    }
}

/// Opens the configured backend, degrading instead of failing.
pub async fn open_store(config: &StoreConfig) -> Box<dyn StateStore> {
    let opened: Result<Box<dyn StateStore>, StoreError> = match config {
        StoreConfig::Csv { path } => FileStore::open(path, FileFormat::Csv)
            .await
            .map(|s| Box::new(s) as Box<dyn StateStore>),
        StoreConfig::Json { path } => FileStore::open(path, FileFormat::Json)
            .await
            .map(|s| Box::new(s) as Box<dyn StateStore>),
        StoreConfig::Memory => Ok(Box::new(MemoryStore::new())),
        StoreConfig::GoogleSheets {
            spreadsheet_id,
            worksheet,
            credentials_path,
            access_token,
            cache_ttl_secs,
        } => {
            let auth = match (access_token, credentials_path) {
                (Some(token), _) => Ok(sheets::SheetsAuth::token(token.clone())),
                (None, Some(path)) => sheets::SheetsAuth::from_key_file(path).await,
                (None, None) => Err(StoreError::Auth("no credentials configured".into())),
            };
            match auth {
                Ok(auth) => SheetsStore::connect(
                    spreadsheet_id,
                    worksheet,
                    auth,
                    Duration::from_secs(*cache_ttl_secs),
                )
                .await
                .map(|s| Box::new(s) as Box<dyn StateStore>),
                Err(e) => Err(e),
            }
        }
    };

    match opened {
        Ok(store) => {
            info!("State store ready ({})", store.backend());
            store
        }
        Err(e) => {
            warn!("State store unavailable, treating every resource as first seen: {}", e);
            Box::new(DegradedStore::new(e.to_string()))
        }
    }
}

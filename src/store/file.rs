//! Local file backends: a spreadsheet-compatible CSV or a JSON row array.
//!
//! Every call reads the file, so what is on disk is always authoritative.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::schema::{self, StatusRow, HEADERS};
use super::{StateStore, StoreError};
use crate::models::{Status, StatusKey, StatusRecord};
use crate::utils::now_local;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<StatusRow>, StoreError> {
        match self {
            FileFormat::Csv => {
                // Cells are kept verbatim; key columns must compare exactly.
                let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
                let mut rows = Vec::new();
                for row in reader.deserialize() {
                    rows.push(row?);
                }
                Ok(rows)
            }
            FileFormat::Json => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok(Vec::new());
                }
                Ok(serde_json::from_slice(bytes)?)
            }
        }
    }

    fn encode(&self, rows: &[StatusRow]) -> Result<Vec<u8>, StoreError> {
        match self {
            FileFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(Vec::new());
                writer.write_record(HEADERS)?;
                for row in rows {
                    writer.serialize(row)?;
                }
                writer.into_inner().map_err(|e| StoreError::Io(e.into_error()))
            }
            FileFormat::Json => Ok(serde_json::to_vec_pretty(rows)?),
        }
    }
}

pub struct FileStore {
    path: PathBuf,
    format: FileFormat,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens `path`, writing an empty table (header only) if it does not exist yet.
    pub async fn open(path: &Path, format: FileFormat) -> Result<Self, StoreError> {
        let store = Self {
            path: path.to_path_buf(),
            format,
            write_lock: Mutex::new(()),
        };

        if tokio::fs::try_exists(&store.path).await? {
            let rows = store.load().await?;
            debug!("Loaded {} rows from {}", rows.len(), store.path.display());
        } else {
            if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            store.save(&[]).await?;
            info!("Created status file {}", store.path.display());
        }
        Ok(store)
    }

    async fn load(&self) -> Result<Vec<StatusRow>, StoreError> {
        let bytes = tokio::fs::read(&self.path).await?;
        self.format.decode(&bytes)
    }

    /// Writes a sibling temp file and renames it over the table, so an
    /// interrupted save leaves the old contents in place.
    async fn save(&self, rows: &[StatusRow]) -> Result<(), StoreError> {
        let bytes = self.format.encode(rows)?;
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    fn backend(&self) -> &str {
        match self.format {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
        }
    }

    async fn get_previous(&self, key: &StatusKey) -> Result<Option<StatusRecord>, StoreError> {
        let rows = self.load().await?;
        Ok(schema::find(&rows, key).and_then(|(_, row)| row.to_record()))
    }

    async fn upsert(
        &self,
        key: &StatusKey,
        status: Status,
        value: &str,
    ) -> Result<StatusRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load().await?;

        let found = schema::find(&rows, key).map(|(i, row)| (i, row.to_record()));
        let existing = found.as_ref().and_then(|(_, record)| record.as_ref());
        let record = StatusRecord::apply(existing, key, status, value, now_local());
        let row = StatusRow::from_record(&record);

        match found {
            Some((index, _)) => rows[index] = row,
            None => rows.push(row),
        }
        self.save(&rows).await?;
        Ok(record)
    }
}

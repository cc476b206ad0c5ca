use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{StateStore, StoreError};
use crate::models::{Status, StatusKey, StatusRecord};
use crate::utils::now_local;

/// Process-local store. Nothing survives the run; used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<StatusKey, StatusRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_records(records: impl IntoIterator<Item = StatusRecord>) -> Self {
        let records = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        Self { records: Mutex::new(records) }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get_previous(&self, key: &StatusKey) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn upsert(
        &self,
        key: &StatusKey,
        status: Status,
        value: &str,
    ) -> Result<StatusRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = StatusRecord::apply(records.get(key), key, status, value, now_local());
        records.insert(key.clone(), record.clone());
        Ok(record)
    }
}

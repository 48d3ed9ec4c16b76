//! Schedule store collaborator.
//!
//! The store is the source of truth for schedule records; the timer table is
//! rebuilt from it on startup. Implementations are expected to make each
//! individual call atomic per record but need not offer transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{NewScheduleRecord, ScheduleRecord, ScheduleUpdate};

/// Access to persisted schedule records.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
  /// Persists a new record and returns it with its store-assigned id.
  async fn create(&self, record: NewScheduleRecord) -> Result<ScheduleRecord, StoreError>;

  /// Fetches a record; `Ok(None)` when it does not exist.
  async fn get_by_id(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>, StoreError>;

  /// Applies a partial update; `Ok(None)` when the record does not exist.
  /// Re-applying the same update must be a no-op.
  async fn update(
    &self,
    schedule_id: &str,
    update: ScheduleUpdate,
  ) -> Result<Option<ScheduleRecord>, StoreError>;

  /// Returns every record.
  async fn list_all(&self) -> Result<Vec<ScheduleRecord>, StoreError>;
}

/// Process-local store backed by a map. Ids are random uuids.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
  records: Mutex<HashMap<String, ScheduleRecord>>,
}

impl InMemoryScheduleStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts (or overwrites) a record under its own id, bypassing id
  /// generation. Used to seed the store with existing data.
  pub fn insert(&self, record: ScheduleRecord) {
    self
      .records
      .lock()
      .insert(record.schedule_id.clone(), record);
  }

  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().is_empty()
  }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
  async fn create(&self, record: NewScheduleRecord) -> Result<ScheduleRecord, StoreError> {
    record.validate().map_err(|e| StoreError::Rejected {
      status: 422,
      message: e.to_string(),
    })?;
    let schedule_id = Uuid::new_v4().to_string();
    let stored = record.into_record(schedule_id.clone());
    self.records.lock().insert(schedule_id.clone(), stored.clone());
    debug!(%schedule_id, "Created schedule record.");
    Ok(stored)
  }

  async fn get_by_id(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>, StoreError> {
    Ok(self.records.lock().get(schedule_id).cloned())
  }

  async fn update(
    &self,
    schedule_id: &str,
    update: ScheduleUpdate,
  ) -> Result<Option<ScheduleRecord>, StoreError> {
    let mut records = self.records.lock();
    let Some(record) = records.get_mut(schedule_id) else {
      return Ok(None);
    };
    update
      .apply_to(record)
      .map_err(|e| StoreError::Rejected {
        status: 422,
        message: e.to_string(),
      })?;
    Ok(Some(record.clone()))
  }

  async fn list_all(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
    Ok(self.records.lock().values().cloned().collect())
  }
}

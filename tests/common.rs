//! tests/common.rs
//! Shared helpers and fake collaborators for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use duekeeper::{
  DueKeeper, InMemoryScheduleStore, JobPayload, LookupError, NewScheduleRecord, Participant,
  ParticipantLookup, ScheduleRecord, ScheduleStore, ScheduleUpdate, StoreError, TaskNameLookup,
  TransportError,
};
use duekeeper::notify::EventTransport;
use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;

pub type ExecFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

/// The business time zone used throughout the tests (UTC+08:00).
pub fn tz() -> FixedOffset {
  FixedOffset::east_opt(8 * 3600).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
  tz().with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
}

// --- Timer callbacks ---

// Creates a job function that increments a counter once it is done.
pub fn job_exec_counter(
  counter: Arc<AtomicUsize>,
  delay: StdDuration,
) -> impl Fn(JobPayload) -> ExecFuture + Send + Sync + 'static {
  move |payload: JobPayload| {
    let ctr = counter.clone();
    Box::pin(async move {
      tracing::debug!(?payload, "Counter job executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      // Counted on completion so tests can tell finished callbacks apart.
      ctr.fetch_add(1, Ordering::SeqCst);
      true
    }) as ExecFuture
  }
}

// Creates a job function that panics.
pub fn job_exec_panic() -> impl Fn(JobPayload) -> ExecFuture + Send + Sync + 'static {
  |_payload: JobPayload| {
    Box::pin(async move {
      tokio::task::yield_now().await;
      let should_panic = true;
      if should_panic {
        panic!("Job forced panic!");
      }
      true
    }) as ExecFuture
  }
}

// --- Store wrapper ---

/// In-memory store that counts writes and can be told to fail them.
#[derive(Debug, Default)]
pub struct FlakyStore {
  pub inner: InMemoryScheduleStore,
  pub creates: AtomicUsize,
  pub updates: AtomicUsize,
  pub fail_creates: AtomicBool,
  pub fail_updates: AtomicBool,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seed(&self, record: ScheduleRecord) {
    self.inner.insert(record);
  }

  pub fn creates(&self) -> usize {
    self.creates.load(Ordering::SeqCst)
  }

  pub fn updates(&self) -> usize {
    self.updates.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ScheduleStore for FlakyStore {
  async fn create(&self, record: NewScheduleRecord) -> Result<ScheduleRecord, StoreError> {
    self.creates.fetch_add(1, Ordering::SeqCst);
    if self.fail_creates.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("create refused".to_string()));
    }
    self.inner.create(record).await
  }

  async fn get_by_id(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>, StoreError> {
    self.inner.get_by_id(schedule_id).await
  }

  async fn update(
    &self,
    schedule_id: &str,
    update: ScheduleUpdate,
  ) -> Result<Option<ScheduleRecord>, StoreError> {
    self.updates.fetch_add(1, Ordering::SeqCst);
    if self.fail_updates.load(Ordering::SeqCst) {
      return Err(StoreError::Unavailable("update refused".to_string()));
    }
    self.inner.update(schedule_id, update).await
  }

  async fn list_all(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
    self.inner.list_all().await
  }
}

// --- Event transport ---

#[derive(Debug, Clone)]
pub struct SentEvent {
  pub topic: String,
  pub key: Option<String>,
  pub body: serde_json::Value,
}

/// Records every published event; keys listed in `fail_keys` are rejected.
#[derive(Debug, Default)]
pub struct RecordingTransport {
  pub sent: Mutex<Vec<SentEvent>>,
  pub fail_keys: Mutex<HashSet<String>>,
}

impl RecordingTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_for(&self, key: &str) {
    self.fail_keys.lock().insert(key.to_string());
  }

  pub fn sent(&self) -> Vec<SentEvent> {
    self.sent.lock().clone()
  }
}

#[async_trait]
impl EventTransport for RecordingTransport {
  async fn send(
    &self,
    topic: &str,
    key: Option<&str>,
    payload: Vec<u8>,
  ) -> Result<(), TransportError> {
    if let Some(key) = key {
      if self.fail_keys.lock().contains(key) {
        return Err(TransportError::Unavailable(format!("broker refused {}", key)));
      }
    }
    let body = serde_json::from_slice(&payload).map_err(|e| TransportError::Encode(e.to_string()))?;
    self.sent.lock().push(SentEvent {
      topic: topic.to_string(),
      key: key.map(str::to_string),
      body,
    });
    Ok(())
  }
}

// --- Task directory ---

/// Fixed task names and participants; either lookup can be switched off.
#[derive(Debug, Default)]
pub struct StaticDirectory {
  pub names: HashMap<String, String>,
  pub participants: HashMap<String, Vec<Participant>>,
  pub names_down: AtomicBool,
  pub participants_down: AtomicBool,
}

impl StaticDirectory {
  pub fn with_task(task_id: &str, name: &str, users: &[&str]) -> Self {
    let mut directory = Self::default();
    directory.names.insert(task_id.to_string(), name.to_string());
    directory.participants.insert(
      task_id.to_string(),
      users.iter().map(|u| participant(u)).collect(),
    );
    directory
  }
}

#[async_trait]
impl TaskNameLookup for StaticDirectory {
  async fn get_task_name(&self, task_id: &str) -> Result<String, LookupError> {
    if self.names_down.load(Ordering::SeqCst) {
      return Err(LookupError::Unavailable("task service down".to_string()));
    }
    self
      .names
      .get(task_id)
      .cloned()
      .ok_or_else(|| LookupError::Unavailable(format!("no task {}", task_id)))
  }
}

#[async_trait]
impl ParticipantLookup for StaticDirectory {
  async fn get_participants(&self, task_id: &str) -> Result<Vec<Participant>, LookupError> {
    if self.participants_down.load(Ordering::SeqCst) {
      return Err(LookupError::Unavailable("participant service down".to_string()));
    }
    Ok(self.participants.get(task_id).cloned().unwrap_or_default())
  }
}

pub fn participant(user_id: &str) -> Participant {
  Participant {
    user_id: user_id.to_string(),
    user_name: format!("User {}", user_id),
    user_email: format!("{}@example.com", user_id),
    user_role: "collaborator".to_string(),
    department: "Operations".to_string(),
  }
}

// --- Engine harness ---

pub struct Harness {
  pub engine: DueKeeper,
  pub store: Arc<FlakyStore>,
  pub transport: Arc<RecordingTransport>,
  pub directory: Arc<StaticDirectory>,
}

// Builds a paused engine so records with past dates do not fire on their own.
pub fn harness(directory: StaticDirectory) -> Harness {
  let store = Arc::new(FlakyStore::new());
  let transport = Arc::new(RecordingTransport::new());
  let directory = Arc::new(directory);
  let engine = DueKeeper::builder()
    .store(store.clone())
    .directory(directory.clone())
    .transport(transport.clone())
    .max_workers(2)
    .start_paused(true)
    .build()
    .expect("engine should build");
  Harness {
    engine,
    store,
    transport,
    directory,
  }
}

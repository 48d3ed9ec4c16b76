use crate::record::ScheduleId;

use thiserror::Error;

/// Errors that can occur while building a `JobScheduler` or `DueKeeper`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum worker count (`max_workers`) must be greater than zero")]
  MissingOrZeroMaxWorkers,
  #[error("Required collaborator `{0}` was not provided to the builder")]
  MissingCollaborator(&'static str),
  #[error("Business time zone offset of {0} seconds is out of range")]
  InvalidOffset(i32),
}

// --- Timer Query Errors ---

/// Errors related to talking to the timer coordinator
/// (e.g. via `schedule`, `cancel`, `list`, `get_metrics_snapshot`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error("Scheduler command channel is closed (likely shut down or panicked).")]
  SchedulerShutdown,
  #[error("Scheduler did not respond to the command (coordinator task may have panicked or shut down).")]
  ResponseFailed,
}

// --- Shutdown Errors ---

/// Errors related to the scheduler shutdown process (`shutdown_graceful`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (scheduler already shut down or watch channel error).")]
  SignalFailed,
  #[error("Timed out waiting for scheduler tasks (Coordinator, Workers) to complete shutdown.")]
  Timeout,
  #[error("A worker or coordinator task panicked during the shutdown process.")]
  TaskPanic,
}

// --- Collaborator Errors ---

/// Failures reported by a `ScheduleStore` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("Schedule store unavailable: {0}")]
  Unavailable(String),
  #[error("Schedule store rejected the request with status {status}: {message}")]
  Rejected { status: u16, message: String },
  #[error("Schedule store returned an undecodable response: {0}")]
  Decode(String),
}

/// Failures of the best-effort task name / participant lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
  #[error("Lookup service unavailable: {0}")]
  Unavailable(String),
  #[error("Lookup returned an undecodable response: {0}")]
  Decode(String),
}

/// Failures of the notification transport for a single publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("Event transport unavailable: {0}")]
  Unavailable(String),
  #[error("Event transport rejected the message: {0}")]
  Rejected(String),
  #[error("Failed to encode event payload: {0}")]
  Encode(String),
}

// --- Engine Errors ---

/// Errors raised by the recurrence processor, deadline monitor and rehydrator.
///
/// A firing whose schedule record has disappeared is not an error; it is
/// reported through the `RecordMissing` variants of the outcome enums.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("Invalid schedule record: {0}")]
  Validation(String),
  #[error("Unsupported recurrence frequency '{0}'")]
  UnsupportedFrequency(String),
  #[error("Calendar arithmetic overflowed while computing the next occurrence")]
  TimeOverflow,
  #[error("Failed to read schedule records: {0}")]
  StoreRead(#[source] StoreError),
  #[error("Failed to write schedule record {schedule_id}: {source}")]
  StoreWrite {
    schedule_id: ScheduleId,
    #[source]
    source: StoreError,
  },
  #[error("Timer engine unavailable: {0}")]
  Scheduler(#[from] QueryError),
}

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{Frequency, ScheduleId};

// --- Public Type Aliases ---

/// Type alias for the unique identifier of a single firing of a job.
/// A fresh UUID v4 is assigned every time a job is (re)armed.
pub type InstanceId = Uuid;

/// Type alias for the simple numeric ID assigned to worker tasks for logging.
pub(crate) type WorkerId = usize;

/// The callback a job executes when it fires.
///
/// Receives the job's payload and returns a `Future` resolving to `bool`:
/// - `true` indicates the firing was handled (including benign no-ops).
/// - `false` indicates a logged failure.
/// Panics within the callback are caught by the worker and counted.
pub type BoxedExecFn = Box<
  dyn Fn(JobPayload) -> Pin<Box<dyn Future<Output = bool> + Send + 'static>> + Send + Sync + 'static,
>;

// --- Job Identity ---

/// The three kinds of time-triggered jobs armed per schedule record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  /// Regenerates the next occurrence of a recurring schedule.
  Recurring,
  /// Fires at the deadline and marks the schedule overdue.
  Deadline,
  /// Fires ahead of the deadline with an advance notice.
  DeadlineApproaching,
}

impl JobKind {
  pub fn prefix(&self) -> &'static str {
    match self {
      JobKind::Recurring => "recurring_",
      JobKind::Deadline => "deadline_",
      JobKind::DeadlineApproaching => "deadline_approaching_",
    }
  }
}

/// Deterministic job identifier derived from kind + schedule id, so
/// rescheduling the same kind for the same schedule replaces the pending job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
  pub fn new(kind: JobKind, schedule_id: &str) -> Self {
    JobId(format!("{}{}", kind.prefix(), schedule_id))
  }

  pub fn recurring(schedule_id: &str) -> Self {
    Self::new(JobKind::Recurring, schedule_id)
  }

  pub fn deadline(schedule_id: &str) -> Self {
    Self::new(JobKind::Deadline, schedule_id)
  }

  pub fn deadline_approaching(schedule_id: &str) -> Self {
    Self::new(JobKind::DeadlineApproaching, schedule_id)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for JobId {
  fn from(s: &str) -> Self {
    JobId(s.to_string())
  }
}

/// Minimal data a callback needs when a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
  Recurring {
    schedule_id: ScheduleId,
    frequency: Frequency,
  },
  Deadline {
    schedule_id: ScheduleId,
  },
  DeadlineApproaching {
    schedule_id: ScheduleId,
  },
  /// Free-form payload for jobs registered directly on the timer.
  Custom {
    value: serde_json::Value,
  },
}

impl JobPayload {
  pub fn schedule_id(&self) -> Option<&str> {
    match self {
      JobPayload::Recurring { schedule_id, .. }
      | JobPayload::Deadline { schedule_id }
      | JobPayload::DeadlineApproaching { schedule_id } => Some(schedule_id),
      JobPayload::Custom { .. } => None,
    }
  }
}

// --- Job Structures ---

/// A pending time-triggered job as visible through `list()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
  pub job_id: JobId,
  pub fire_at: DateTime<Utc>,
  pub payload: JobPayload,
}

impl ScheduledJob {
  pub fn new(job_id: JobId, fire_at: DateTime<Utc>, payload: JobPayload) -> Self {
    Self {
      job_id,
      fire_at,
      payload,
    }
  }
}

/// Internal entry of the coordinator's job table. Not exposed publicly.
pub(crate) struct JobEntry {
  pub job: ScheduledJob,
  pub exec_fn: Arc<BoxedExecFn>,
  /// Instance armed by the latest upsert; a new id on every replace.
  pub instance_id: InstanceId,
}

impl fmt::Debug for JobEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobEntry")
      .field("job", &self.job)
      .field("exec_fn", &format_args!("Arc<BoxedExecFn>"))
      .field("instance_id", &self.instance_id)
      .finish()
  }
}

/// A job popped off the queue and handed to a worker.
pub(crate) struct Dispatch {
  pub job: ScheduledJob,
  pub exec_fn: Arc<BoxedExecFn>,
  pub instance_id: InstanceId,
}

impl fmt::Debug for Dispatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatch")
      .field("job_id", &self.job.job_id)
      .field("fire_at", &self.job.fire_at)
      .field("instance_id", &self.instance_id)
      .finish()
  }
}

//! Schedule records as persisted by the external schedule service.
//!
//! The engine never owns these records: it reads them, creates the next
//! occurrence of a recurring record, and moves `status` to `overdue`. All
//! field-presence rules are checked when a record is built or updated, not
//! where it is used.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Opaque identifier of a schedule record, generated by the store.
pub type ScheduleId = String;

/// Identifier of the external task a schedule belongs to.
pub type TaskId = String;

/// Recurrence frequency of a recurring schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
  Weekly,
  Monthly,
  Yearly,
  /// The next occurrence begins right after the previous deadline.
  Immediate,
}

impl Frequency {
  pub fn as_str(&self) -> &'static str {
    match self {
      Frequency::Weekly => "Weekly",
      Frequency::Monthly => "Monthly",
      Frequency::Yearly => "Yearly",
      Frequency::Immediate => "Immediate",
    }
  }
}

impl fmt::Display for Frequency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Frequency {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Weekly" => Ok(Frequency::Weekly),
      "Monthly" => Ok(Frequency::Monthly),
      "Yearly" => Ok(Frequency::Yearly),
      "Immediate" => Ok(Frequency::Immediate),
      other => Err(EngineError::UnsupportedFrequency(other.to_string())),
    }
  }
}

/// Lifecycle status of a schedule record.
///
/// The store treats status as a free-form string; only the four named values
/// carry meaning for the engine. Anything else round-trips through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleStatus {
  Ongoing,
  Overdue,
  Completed,
  Cancelled,
  Other(String),
}

impl ScheduleStatus {
  pub fn as_str(&self) -> &str {
    match self {
      ScheduleStatus::Ongoing => "ongoing",
      ScheduleStatus::Overdue => "overdue",
      ScheduleStatus::Completed => "completed",
      ScheduleStatus::Cancelled => "cancelled",
      ScheduleStatus::Other(s) => s.as_str(),
    }
  }

  /// `completed` or `cancelled`: the owner is done with this schedule.
  pub fn is_terminal(&self) -> bool {
    matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
  }

  /// Terminal, or already transitioned to `overdue`. Deadline firings skip these.
  pub fn is_settled(&self) -> bool {
    self.is_terminal() || *self == ScheduleStatus::Overdue
  }
}

impl From<String> for ScheduleStatus {
  fn from(s: String) -> Self {
    match s.as_str() {
      "ongoing" => ScheduleStatus::Ongoing,
      "overdue" => ScheduleStatus::Overdue,
      "completed" => ScheduleStatus::Completed,
      "cancelled" => ScheduleStatus::Cancelled,
      _ => ScheduleStatus::Other(s),
    }
  }
}

impl From<ScheduleStatus> for String {
  fn from(status: ScheduleStatus) -> Self {
    match status {
      ScheduleStatus::Other(s) => s,
      known => known.as_str().to_string(),
    }
  }
}

impl fmt::Display for ScheduleStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A schedule record as returned by the store.
///
/// Records come from outside the engine and may be stale or partially edited,
/// so the recurrence fields stay optional here; [`ScheduleRecord::recurrence`]
/// is the completeness check used at fire time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
  pub schedule_id: ScheduleId,
  pub task_id: TaskId,
  pub start: Option<DateTime<FixedOffset>>,
  pub deadline: Option<DateTime<FixedOffset>>,
  pub status: ScheduleStatus,
  #[serde(default)]
  pub is_recurring: bool,
  /// Kept as the raw stored string: an unknown value must only fail the
  /// record it belongs to, not the decoding of a whole listing.
  #[serde(default)]
  pub frequency: Option<String>,
  #[serde(default)]
  pub next_occurrence: Option<DateTime<FixedOffset>>,
}

impl ScheduleRecord {
  /// The stored frequency, parsed. `Ok(None)` when absent.
  pub fn parsed_frequency(&self) -> Result<Option<Frequency>, EngineError> {
    self.frequency.as_deref().map(str::parse).transpose()
  }

  /// Returns `(frequency, next_occurrence)` only for a complete recurring record.
  ///
  /// Fails with [`EngineError::UnsupportedFrequency`] when the record is
  /// recurring but its stored frequency is not one the engine knows.
  pub fn recurrence(&self) -> Result<Option<(Frequency, DateTime<FixedOffset>)>, EngineError> {
    if !self.is_recurring {
      return Ok(None);
    }
    let frequency = self.parsed_frequency()?;
    Ok(frequency.zip(self.next_occurrence))
  }

  /// Same as [`ScheduleRecord::recurrence`] but fails with a validation error,
  /// for call sites that were asked to arm a recurring job.
  pub fn require_recurrence(&self) -> Result<(Frequency, DateTime<FixedOffset>), EngineError> {
    if !self.is_recurring {
      return Err(EngineError::Validation(format!(
        "schedule {} is not recurring",
        self.schedule_id
      )));
    }
    self.recurrence()?.ok_or_else(|| {
      EngineError::Validation(format!(
        "recurring schedule {} is missing frequency or next_occurrence",
        self.schedule_id
      ))
    })
  }

  /// The `(start, deadline)` window, when both ends are present.
  pub fn window(&self) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    self.start.zip(self.deadline)
  }
}

/// A validated request to create a schedule record.
///
/// Fields are private so the recurrence invariant cannot be bypassed:
/// a recurring record always carries both frequency and next occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewScheduleRecord {
  task_id: TaskId,
  start: DateTime<FixedOffset>,
  deadline: DateTime<FixedOffset>,
  is_recurring: bool,
  status: ScheduleStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  next_occurrence: Option<DateTime<FixedOffset>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  frequency: Option<Frequency>,
}

impl NewScheduleRecord {
  /// A non-recurring schedule with status `ongoing`.
  pub fn one_off(
    task_id: impl Into<TaskId>,
    start: DateTime<FixedOffset>,
    deadline: DateTime<FixedOffset>,
  ) -> Result<Self, EngineError> {
    let record = Self {
      task_id: task_id.into(),
      start,
      deadline,
      is_recurring: false,
      status: ScheduleStatus::Ongoing,
      next_occurrence: None,
      frequency: None,
    };
    record.validate()?;
    Ok(record)
  }

  /// A recurring schedule with status `ongoing`.
  pub fn recurring(
    task_id: impl Into<TaskId>,
    start: DateTime<FixedOffset>,
    deadline: DateTime<FixedOffset>,
    frequency: Frequency,
    next_occurrence: DateTime<FixedOffset>,
  ) -> Result<Self, EngineError> {
    let record = Self {
      task_id: task_id.into(),
      start,
      deadline,
      is_recurring: true,
      status: ScheduleStatus::Ongoing,
      next_occurrence: Some(next_occurrence),
      frequency: Some(frequency),
    };
    record.validate()?;
    Ok(record)
  }

  /// Overrides the initial status (defaults to `ongoing`).
  pub fn with_status(mut self, status: ScheduleStatus) -> Self {
    self.status = status;
    self
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.deadline <= self.start {
      return Err(EngineError::Validation(format!(
        "deadline {} must be after start {}",
        self.deadline, self.start
      )));
    }
    if self.is_recurring && (self.frequency.is_none() || self.next_occurrence.is_none()) {
      return Err(EngineError::Validation(
        "recurring schedule requires frequency and next_occurrence".to_string(),
      ));
    }
    Ok(())
  }

  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  pub fn start(&self) -> DateTime<FixedOffset> {
    self.start
  }

  pub fn deadline(&self) -> DateTime<FixedOffset> {
    self.deadline
  }

  pub fn is_recurring(&self) -> bool {
    self.is_recurring
  }

  pub fn status(&self) -> &ScheduleStatus {
    &self.status
  }

  pub fn frequency(&self) -> Option<Frequency> {
    self.frequency
  }

  pub fn next_occurrence(&self) -> Option<DateTime<FixedOffset>> {
    self.next_occurrence
  }

  /// Materializes the stored record once the store has assigned an id.
  pub fn into_record(self, schedule_id: impl Into<ScheduleId>) -> ScheduleRecord {
    ScheduleRecord {
      schedule_id: schedule_id.into(),
      task_id: self.task_id,
      start: Some(self.start),
      deadline: Some(self.deadline),
      status: self.status,
      is_recurring: self.is_recurring,
      frequency: self.frequency.map(|f| f.to_string()),
      next_occurrence: self.next_occurrence,
    }
  }
}

/// A partial update of a schedule record. Absent fields are left unchanged
/// and are not serialized, so a status-only update is exactly `{"status": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ScheduleStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start: Option<DateTime<FixedOffset>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deadline: Option<DateTime<FixedOffset>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_recurring: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub frequency: Option<Frequency>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub next_occurrence: Option<DateTime<FixedOffset>>,
}

impl ScheduleUpdate {
  pub fn status(status: ScheduleStatus) -> Self {
    Self {
      status: Some(status),
      ..Default::default()
    }
  }

  /// Applies the update to `record`, rejecting results that break the
  /// record invariants. `record` is untouched on error.
  pub fn apply_to(&self, record: &mut ScheduleRecord) -> Result<(), EngineError> {
    let mut updated = record.clone();
    if let Some(status) = &self.status {
      updated.status = status.clone();
    }
    if let Some(start) = self.start {
      updated.start = Some(start);
    }
    if let Some(deadline) = self.deadline {
      updated.deadline = Some(deadline);
    }
    if let Some(is_recurring) = self.is_recurring {
      updated.is_recurring = is_recurring;
    }
    if let Some(frequency) = self.frequency {
      updated.frequency = Some(frequency.to_string());
    }
    if let Some(next) = self.next_occurrence {
      updated.next_occurrence = Some(next);
    }

    if let Some((start, deadline)) = updated.window() {
      if deadline <= start {
        return Err(EngineError::Validation(format!(
          "deadline {} must be after start {}",
          deadline, start
        )));
      }
    }
    // Only re-check recurrence when this update touches it, so a status write
    // still lands on a record whose stored frequency is unsupported.
    let touches_recurrence =
      self.is_recurring.is_some() || self.frequency.is_some() || self.next_occurrence.is_some();
    if updated.is_recurring && touches_recurrence {
      updated.require_recurrence()?;
    }

    *record = updated;
    Ok(())
  }
}

//! Occurrence arithmetic for recurring schedules.
//!
//! Pure functions, no I/O. All inputs are expected to be normalized to the
//! business time zone first (see [`to_business`]) because month and year
//! steps are taken on the local calendar date.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Months, TimeZone};

use crate::error::EngineError;
use crate::record::Frequency;

/// Default business time zone offset: UTC+08:00, no DST.
pub const DEFAULT_BUSINESS_OFFSET_SECS: i32 = 8 * 3600;

/// Default buffer added after a deadline for `Immediate` recurrence.
pub const DEFAULT_IMMEDIATE_BUFFER_SECS: i64 = 60;

/// Converts any timestamp into the business time zone.
pub fn to_business<Tz: TimeZone>(dt: &DateTime<Tz>, offset: &FixedOffset) -> DateTime<FixedOffset> {
  dt.with_timezone(offset)
}

/// One concrete occurrence of a recurring schedule, together with the
/// precomputed occurrence after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
  pub start: DateTime<FixedOffset>,
  pub deadline: DateTime<FixedOffset>,
  /// Deadline-equivalent of the occurrence that follows this one.
  pub next_occurrence: DateTime<FixedOffset>,
}

/// Computes successive occurrences for a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceCalculator {
  immediate_buffer: ChronoDuration,
}

impl Default for OccurrenceCalculator {
  fn default() -> Self {
    Self {
      immediate_buffer: ChronoDuration::seconds(DEFAULT_IMMEDIATE_BUFFER_SECS),
    }
  }
}

impl OccurrenceCalculator {
  pub fn new(immediate_buffer: ChronoDuration) -> Self {
    Self { immediate_buffer }
  }

  /// Returns the deadline of the occurrence following `(start, deadline)`.
  ///
  /// - `Weekly`: start + 7 days, plus the original gap.
  /// - `Monthly` / `Yearly`: start + 1 calendar month / year (day-of-month
  ///   clamped to the last valid day), plus the original gap.
  /// - `Immediate`: deadline + the immediate buffer, whatever `start` is.
  pub fn next_deadline(
    &self,
    frequency: Frequency,
    start: DateTime<FixedOffset>,
    deadline: DateTime<FixedOffset>,
  ) -> Result<DateTime<FixedOffset>, EngineError> {
    let next_start = match frequency {
      Frequency::Weekly => start.checked_add_signed(ChronoDuration::weeks(1)),
      Frequency::Monthly => start.checked_add_months(Months::new(1)),
      Frequency::Yearly => start.checked_add_months(Months::new(12)),
      Frequency::Immediate => {
        return deadline
          .checked_add_signed(self.immediate_buffer)
          .ok_or(EngineError::TimeOverflow);
      }
    }
    .ok_or(EngineError::TimeOverflow)?;
    let gap = positive_gap(start, deadline)?;

    next_start
      .checked_add_signed(gap)
      .ok_or(EngineError::TimeOverflow)
  }

  /// Advances `(start, deadline)` by one occurrence and precomputes the
  /// occurrence after that, so the new record is created with its
  /// `next_occurrence` already populated.
  pub fn advance(
    &self,
    frequency: Frequency,
    start: DateTime<FixedOffset>,
    deadline: DateTime<FixedOffset>,
  ) -> Result<Occurrence, EngineError> {
    let gap = positive_gap(start, deadline)?;

    let new_deadline = self.next_deadline(frequency, start, deadline)?;
    let new_start = new_deadline
      .checked_sub_signed(gap)
      .ok_or(EngineError::TimeOverflow)?;
    let next_occurrence = self.next_deadline(frequency, new_start, new_deadline)?;

    Ok(Occurrence {
      start: new_start,
      deadline: new_deadline,
      next_occurrence,
    })
  }
}

/// [`OccurrenceCalculator::next_deadline`] with the default one-minute buffer.
pub fn next_occurrence(
  frequency: Frequency,
  start: DateTime<FixedOffset>,
  deadline: DateTime<FixedOffset>,
) -> Result<DateTime<FixedOffset>, EngineError> {
  OccurrenceCalculator::default().next_deadline(frequency, start, deadline)
}

fn positive_gap(
  start: DateTime<FixedOffset>,
  deadline: DateTime<FixedOffset>,
) -> Result<ChronoDuration, EngineError> {
  let gap = deadline.signed_duration_since(start);
  if gap <= ChronoDuration::zero() {
    return Err(EngineError::Validation(format!(
      "deadline {} must be after start {}",
      deadline, start
    )));
  }
  Ok(gap)
}

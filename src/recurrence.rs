//! Recurrence processor: regenerates the next occurrence of a recurring
//! schedule when its job fires, and arms/cancels recurring jobs.

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, info, warn};

use crate::engine::DueKeeper;
use crate::error::EngineError;
use crate::job::{JobId, JobPayload, ScheduledJob};
use crate::occurrence::to_business;
use crate::record::{Frequency, NewScheduleRecord, ScheduleRecord, ScheduleStatus};

/// What a recurring firing did.
#[derive(Debug, Clone, PartialEq)]
pub enum RecurrenceOutcome {
  /// A new record was created and its recurring and deadline jobs armed.
  Regenerated { record: ScheduleRecord },
  /// The record no longer exists.
  RecordMissing,
  /// The record is no longer a complete recurring record.
  NotRecurring,
  /// The record was cancelled after the job was armed.
  CancelledExternally,
}

impl DueKeeper {
  /// Arms (or re-arms) the recurring job of `record` at its `next_occurrence`.
  ///
  /// Fails with a validation error unless the record is recurring with both
  /// `frequency` and `next_occurrence` present.
  pub async fn schedule_recurring_task(
    &self,
    record: &ScheduleRecord,
  ) -> Result<DateTime<Utc>, EngineError> {
    let (frequency, next_occurrence) = record.require_recurrence()?;
    self
      .schedule_recurring(&record.schedule_id, frequency, next_occurrence)
      .await
  }

  /// Arms the recurring job for `schedule_id` at `next_occurrence`, replacing
  /// any pending one. Returns the fire instant.
  pub async fn schedule_recurring(
    &self,
    schedule_id: &str,
    frequency: Frequency,
    next_occurrence: DateTime<FixedOffset>,
  ) -> Result<DateTime<Utc>, EngineError> {
    let fire_at = next_occurrence.with_timezone(&Utc);
    let job = ScheduledJob::new(
      JobId::recurring(schedule_id),
      fire_at,
      JobPayload::Recurring {
        schedule_id: schedule_id.to_string(),
        frequency,
      },
    );
    let replaced = self
      .inner
      .scheduler
      .schedule_shared(job, self.inner.on_fire.clone())
      .await?;
    info!(%schedule_id, %frequency, %fire_at, replaced, "Armed recurring job.");
    Ok(fire_at)
  }

  /// Removes the pending recurring job. Returns `false` if none was pending.
  pub async fn cancel_recurring_task(&self, schedule_id: &str) -> Result<bool, EngineError> {
    let removed = self
      .inner
      .scheduler
      .cancel(&JobId::recurring(schedule_id))
      .await?;
    debug!(%schedule_id, removed, "Cancelled recurring job.");
    Ok(removed)
  }

  /// Handles a recurring firing.
  ///
  /// Refetches the record and, if it is still an active recurring schedule,
  /// creates the next occurrence as a new record and arms its recurring and
  /// deadline jobs. A failed create stops this chain; nothing is retried.
  pub async fn process_recurring_task(
    &self,
    schedule_id: &str,
    frequency: Frequency,
  ) -> Result<RecurrenceOutcome, EngineError> {
    let Some(record) = self.fetch(schedule_id).await? else {
      info!(%schedule_id, "Schedule record no longer exists. Skipping recurring firing.");
      return Ok(RecurrenceOutcome::RecordMissing);
    };

    // An unsupported stored frequency fails this firing only.
    let Some((record_frequency, _)) = record.recurrence()? else {
      info!(%schedule_id, "Schedule is no longer recurring. Not regenerating.");
      return Ok(RecurrenceOutcome::NotRecurring);
    };
    if record.status == ScheduleStatus::Cancelled {
      info!(%schedule_id, "Schedule was cancelled. Not regenerating.");
      return Ok(RecurrenceOutcome::CancelledExternally);
    }
    if record_frequency != frequency {
      warn!(
        %schedule_id,
        armed = %frequency,
        stored = %record_frequency,
        "Frequency changed since the job was armed. Using the stored one."
      );
    }
    let Some((start, deadline)) = record.window() else {
      return Err(EngineError::Validation(format!(
        "recurring schedule {} has no start/deadline window",
        schedule_id
      )));
    };

    let offset = self.inner.config.business_offset;
    let occurrence = self.inner.calculator.advance(
      record_frequency,
      to_business(&start, &offset),
      to_business(&deadline, &offset),
    )?;

    let new_record = NewScheduleRecord::recurring(
      record.task_id.clone(),
      occurrence.start,
      occurrence.deadline,
      record_frequency,
      occurrence.next_occurrence,
    )?;
    let created = match self.inner.store.create(new_record).await {
      Ok(created) => created,
      Err(source) => {
        error!(
          %schedule_id,
          task_id = %record.task_id,
          error = %source,
          "Failed to create the next occurrence. Recurrence chain stops here."
        );
        return Err(EngineError::StoreWrite {
          schedule_id: schedule_id.to_string(),
          source,
        });
      }
    };

    info!(
      %schedule_id,
      new_schedule_id = %created.schedule_id,
      start = %occurrence.start,
      deadline = %occurrence.deadline,
      next_occurrence = %occurrence.next_occurrence,
      "Regenerated recurring schedule."
    );

    self.schedule_recurring_task(&created).await?;
    self.schedule_deadline_monitoring(&created).await?;

    Ok(RecurrenceOutcome::Regenerated { record: created })
  }
}

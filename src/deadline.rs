//! Deadline monitor: two one-shot watches per schedule record.
//!
//! The approaching watch fires `approaching_lead` before the deadline and only
//! notifies. The overdue watch fires at the deadline, persists
//! `status = overdue` and then notifies. It is the only writer of that status.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::engine::DueKeeper;
use crate::error::EngineError;
use crate::job::{JobId, JobPayload, ScheduledJob};
use crate::lookup::Participant;
use crate::notify::{DeliveryReport, EventType, NotificationEvent};
use crate::occurrence::to_business;
use crate::record::{ScheduleRecord, ScheduleStatus, ScheduleUpdate};

/// Fire instants armed by [`DueKeeper::schedule_deadline_monitoring`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineWatches {
  /// `None` when the approaching instant had already passed.
  pub approaching: Option<DateTime<Utc>>,
  pub overdue: DateTime<Utc>,
}

/// What a deadline firing did.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadlineOutcome {
  /// Notifications were attempted; per-recipient counts.
  Notified(DeliveryReport),
  /// The record no longer exists.
  RecordMissing,
  /// The record is already completed, cancelled or overdue.
  AlreadySettled(ScheduleStatus),
  /// The record's deadline was cleared.
  NoDeadline,
}

impl DueKeeper {
  /// Arms the approaching and overdue watches for `record`.
  ///
  /// The overdue watch is always armed, even for a deadline in the past (it
  /// then fires as soon as dispatch allows). The approaching watch is armed
  /// only if its instant is still ahead; otherwise any stale approaching
  /// watch for the record is removed.
  pub async fn schedule_deadline_monitoring(
    &self,
    record: &ScheduleRecord,
  ) -> Result<DeadlineWatches, EngineError> {
    let schedule_id = record.schedule_id.as_str();
    let Some(deadline) = record.deadline else {
      return Err(EngineError::Validation(format!(
        "schedule {} has no deadline to monitor",
        schedule_id
      )));
    };

    let overdue_at = deadline.with_timezone(&Utc);
    let approaching_at = overdue_at
      .checked_sub_signed(self.inner.config.approaching_lead)
      .filter(|at| *at > Utc::now());

    let approaching_id = JobId::deadline_approaching(schedule_id);
    match approaching_at {
      Some(fire_at) => {
        let job = ScheduledJob::new(
          approaching_id,
          fire_at,
          JobPayload::DeadlineApproaching {
            schedule_id: schedule_id.to_string(),
          },
        );
        self
          .inner
          .scheduler
          .schedule_shared(job, self.inner.on_fire.clone())
          .await?;
      }
      None => {
        self.inner.scheduler.cancel(&approaching_id).await?;
        debug!(%schedule_id, %deadline, "Deadline is too close for an approaching notice.");
      }
    }

    let job = ScheduledJob::new(
      JobId::deadline(schedule_id),
      overdue_at,
      JobPayload::Deadline {
        schedule_id: schedule_id.to_string(),
      },
    );
    self
      .inner
      .scheduler
      .schedule_shared(job, self.inner.on_fire.clone())
      .await?;

    info!(
      %schedule_id,
      overdue_at = %overdue_at,
      approaching_at = ?approaching_at,
      "Armed deadline monitoring."
    );
    Ok(DeadlineWatches {
      approaching: approaching_at,
      overdue: overdue_at,
    })
  }

  /// Removes both deadline watches. Idempotent.
  pub async fn cancel_deadline_monitoring(&self, schedule_id: &str) -> Result<(), EngineError> {
    let approaching = self
      .inner
      .scheduler
      .cancel(&JobId::deadline_approaching(schedule_id))
      .await?;
    let overdue = self
      .inner
      .scheduler
      .cancel(&JobId::deadline(schedule_id))
      .await?;
    debug!(%schedule_id, approaching, overdue, "Cancelled deadline monitoring.");
    Ok(())
  }

  /// Removes the recurring job and both deadline watches.
  ///
  /// Returns `true` only if all three cancellations went through. Every
  /// cancellation is attempted even if an earlier one failed.
  pub async fn cancel_all_task_jobs(&self, schedule_id: &str) -> bool {
    let mut all_ok = true;
    for job_id in [
      JobId::recurring(schedule_id),
      JobId::deadline(schedule_id),
      JobId::deadline_approaching(schedule_id),
    ] {
      if let Err(e) = self.inner.scheduler.cancel(&job_id).await {
        warn!(%job_id, error = %e, "Failed to cancel job.");
        all_ok = false;
      }
    }
    all_ok
  }

  /// Handles the overdue firing (also usable as a manual trigger).
  ///
  /// The status write must land before anyone is notified; if it fails the
  /// firing is aborted with [`EngineError::StoreWrite`].
  pub async fn process_deadline_reached(
    &self,
    schedule_id: &str,
  ) -> Result<DeadlineOutcome, EngineError> {
    let Some(record) = self.fetch(schedule_id).await? else {
      info!(%schedule_id, "Schedule record no longer exists. Skipping overdue firing.");
      return Ok(DeadlineOutcome::RecordMissing);
    };
    if let Some(skip) = settled_or_cleared(&record) {
      return Ok(skip);
    }

    let updated = match self
      .inner
      .store
      .update(schedule_id, ScheduleUpdate::status(ScheduleStatus::Overdue))
      .await
    {
      Ok(Some(updated)) => updated,
      Ok(None) => {
        info!(%schedule_id, "Schedule record vanished before the overdue write.");
        return Ok(DeadlineOutcome::RecordMissing);
      }
      Err(source) => {
        error!(%schedule_id, error = %source, "Failed to mark schedule overdue. Not notifying.");
        return Err(EngineError::StoreWrite {
          schedule_id: schedule_id.to_string(),
          source,
        });
      }
    };
    info!(%schedule_id, task_id = %updated.task_id, "Schedule is now overdue.");

    let report = self.notify(EventType::DeadlineOverdue, &updated).await;
    Ok(DeadlineOutcome::Notified(report))
  }

  /// Handles the approaching firing (also usable as a manual trigger).
  /// Never changes the record.
  pub async fn process_deadline_approaching(
    &self,
    schedule_id: &str,
  ) -> Result<DeadlineOutcome, EngineError> {
    let Some(record) = self.fetch(schedule_id).await? else {
      info!(%schedule_id, "Schedule record no longer exists. Skipping approaching firing.");
      return Ok(DeadlineOutcome::RecordMissing);
    };
    if let Some(skip) = settled_or_cleared(&record) {
      return Ok(skip);
    }

    let report = self.notify(EventType::DeadlineApproaching, &record).await;
    Ok(DeadlineOutcome::Notified(report))
  }

  async fn task_name(&self, task_id: &str) -> String {
    match self.inner.task_names.get_task_name(task_id).await {
      Ok(name) => name,
      Err(e) => {
        warn!(%task_id, error = %e, "Task name lookup failed. Using placeholder.");
        self.inner.config.task_name_placeholder.clone()
      }
    }
  }

  async fn recipients(&self, task_id: &str) -> Vec<Participant> {
    match self.inner.participants.get_participants(task_id).await {
      Ok(participants) => participants,
      Err(e) => {
        warn!(%task_id, error = %e, "Participant lookup failed. Nobody will be notified.");
        Vec::new()
      }
    }
  }

  /// Sends one `event_type` event per participant of the record's task.
  async fn notify(&self, event_type: EventType, record: &ScheduleRecord) -> DeliveryReport {
    let schedule_id = record.schedule_id.as_str();
    let task_name = self.task_name(&record.task_id).await;
    let participants = self.recipients(&record.task_id).await;
    if participants.is_empty() {
      info!(%schedule_id, %event_type, "No participants to notify.");
      return DeliveryReport::default();
    }

    let offset = self.inner.config.business_offset;
    let mut event = NotificationEvent::new(event_type, to_business(&Utc::now(), &offset))
      .with("task_id", record.task_id.as_str())
      .with("task_name", task_name)
      .with("schedule_id", schedule_id);
    if let Some(deadline) = record.deadline {
      event = event.with("deadline", to_business(&deadline, &offset).to_rfc3339());
    }

    let report = self
      .inner
      .emitter
      .notify_participants(&event, &participants)
      .await;
    if report.failed > 0 {
      warn!(
        %schedule_id,
        %event_type,
        sent = report.sent,
        failed = report.failed,
        "Some notifications could not be published."
      );
    } else {
      info!(%schedule_id, %event_type, sent = report.sent, "Notified participants.");
    }
    report
  }
}

fn settled_or_cleared(record: &ScheduleRecord) -> Option<DeadlineOutcome> {
  if record.deadline.is_none() {
    info!(schedule_id = %record.schedule_id, "Deadline was cleared. Skipping firing.");
    return Some(DeadlineOutcome::NoDeadline);
  }
  if record.status.is_settled() {
    info!(
      schedule_id = %record.schedule_id,
      status = %record.status,
      "Schedule already settled. Skipping firing."
    );
    return Some(DeadlineOutcome::AlreadySettled(record.status.clone()));
  }
  None
}

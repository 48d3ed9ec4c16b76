//! Startup rehydration: rebuild the in-memory timer table from the store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deadline::DeadlineOutcome;
use crate::engine::DueKeeper;
use crate::error::EngineError;
use crate::record::ScheduleRecord;

/// Counts from one rehydration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RehydrationReport {
  pub records_seen: usize,
  /// Past-deadline records marked overdue during the catch-up pass.
  pub caught_up: usize,
  pub recurring_armed: usize,
  pub deadline_watches_armed: usize,
  /// Individual records whose catch-up or arming failed.
  pub failures: usize,
}

impl DueKeeper {
  /// Reads every schedule record and re-arms the timer.
  ///
  /// Runs in two passes. The catch-up pass runs the overdue logic in place
  /// for every unsettled record whose deadline already passed. The
  /// steady-state pass then arms recurring jobs and deadline watches.
  ///
  /// A recurring record whose successor is already stored is not re-armed:
  /// it has fired and regenerated before the restart. A recurring record
  /// whose stored frequency is unsupported is counted as a failure and left
  /// unarmed; its deadline watches are still armed.
  ///
  /// Per-record failures are logged and counted; only a failure to list the
  /// records is returned as an error.
  pub async fn rehydrate(&self) -> Result<RehydrationReport, EngineError> {
    let records = self
      .inner
      .store
      .list_all()
      .await
      .map_err(EngineError::StoreRead)?;
    let mut report = RehydrationReport {
      records_seen: records.len(),
      ..Default::default()
    };
    info!(records = records.len(), "Rehydrating scheduler from store.");

    // --- Catch-up pass ---
    let now = Utc::now();
    let mut caught_up = HashSet::new();
    for record in &records {
      let Some(deadline) = record.deadline else {
        continue;
      };
      if deadline.with_timezone(&Utc) >= now || record.status.is_settled() {
        continue;
      }
      match self.process_deadline_reached(&record.schedule_id).await {
        Ok(DeadlineOutcome::Notified(delivery)) => {
          info!(
            schedule_id = %record.schedule_id,
            sent = delivery.sent,
            failed = delivery.failed,
            "Caught up missed deadline."
          );
          report.caught_up += 1;
          caught_up.insert(record.schedule_id.as_str());
        }
        Ok(outcome) => {
          info!(schedule_id = %record.schedule_id, ?outcome, "Catch-up skipped.");
        }
        Err(e) => {
          warn!(
            schedule_id = %record.schedule_id,
            error = %e,
            "Catch-up failed. The overdue watch will retry."
          );
          report.failures += 1;
        }
      }
    }

    // --- Steady-state pass ---
    let successors = successor_keys(&records);
    for record in &records {
      let next = match record.recurrence() {
        Ok(Some((_, next))) => next,
        Ok(None) => continue,
        Err(e) => {
          warn!(schedule_id = %record.schedule_id, error = %e, "Cannot re-arm recurring job.");
          report.failures += 1;
          continue;
        }
      };
      if successors.contains(&(record.task_id.as_str(), next.with_timezone(&Utc))) {
        debug!(schedule_id = %record.schedule_id, "Already regenerated. Not re-arming.");
        continue;
      }
      match self.schedule_recurring_task(record).await {
        Ok(_) => report.recurring_armed += 1,
        Err(e) => {
          warn!(schedule_id = %record.schedule_id, error = %e, "Failed to re-arm recurring job.");
          report.failures += 1;
        }
      }
    }

    for record in &records {
      if record.deadline.is_none()
        || record.status.is_settled()
        || caught_up.contains(record.schedule_id.as_str())
      {
        continue;
      }
      match self.schedule_deadline_monitoring(record).await {
        Ok(_) => report.deadline_watches_armed += 1,
        Err(e) => {
          warn!(schedule_id = %record.schedule_id, error = %e, "Failed to re-arm deadline watches.");
          report.failures += 1;
        }
      }
    }

    info!(
      records_seen = report.records_seen,
      caught_up = report.caught_up,
      recurring_armed = report.recurring_armed,
      deadline_watches_armed = report.deadline_watches_armed,
      failures = report.failures,
      "Rehydration finished."
    );
    Ok(report)
  }
}

/// `(task_id, deadline)` of every recurring record.
///
/// A regenerated record's deadline is its predecessor's `next_occurrence`, so
/// a record whose `(task_id, next_occurrence)` appears here already has a
/// successor. Independent recurring schedules on the same task have their own
/// deadlines and are unaffected.
fn successor_keys(records: &[ScheduleRecord]) -> HashSet<(&str, DateTime<Utc>)> {
  records
    .iter()
    .filter(|record| record.is_recurring)
    .filter_map(|record| {
      record
        .deadline
        .map(|deadline| (record.task_id.as_str(), deadline.with_timezone(&Utc)))
    })
    .collect()
}

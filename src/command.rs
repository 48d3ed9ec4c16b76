use crate::job::{BoxedExecFn, InstanceId, JobId, ScheduledJob};
use crate::metrics::MetricsSnapshot;

use std::sync::Arc;

use tokio::sync::oneshot;

/// Commands sent from the `JobScheduler` handle to the central Coordinator task.
///
/// Each command includes a `oneshot::Sender` for the Coordinator
/// to send the response back to the requesting task.
pub(crate) enum CoordinatorCommand {
  /// Register a job, replacing any pending job with the same id.
  Schedule {
    job: ScheduledJob,
    exec_fn: Arc<BoxedExecFn>,
    /// `true` if an existing pending job was replaced.
    responder: oneshot::Sender<bool>,
  },
  /// Remove a pending job if present.
  Cancel {
    job_id: JobId,
    /// `true` if a pending job was removed, `false` if there was none.
    responder: oneshot::Sender<bool>,
  },
  /// Snapshot of all pending jobs.
  List {
    responder: oneshot::Sender<Vec<ScheduledJob>>,
  },
  GetMetricsSnapshot {
    responder: oneshot::Sender<MetricsSnapshot>,
  },
  /// Stop (`true`) or restart (`false`) dispatching due jobs.
  SetPaused {
    paused: bool,
    responder: oneshot::Sender<()>,
  },
}

impl std::fmt::Debug for CoordinatorCommand {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CoordinatorCommand::Schedule { job, .. } => f
        .debug_struct("Schedule")
        .field("job", job)
        .field("exec_fn", &format_args!("<Fn>"))
        .finish(),
      CoordinatorCommand::Cancel { job_id, .. } => {
        f.debug_struct("Cancel").field("job_id", job_id).finish()
      }
      CoordinatorCommand::List { .. } => f.write_str("List"),
      CoordinatorCommand::GetMetricsSnapshot { .. } => f.write_str("GetMetricsSnapshot"),
      CoordinatorCommand::SetPaused { paused, .. } => {
        f.debug_struct("SetPaused").field("paused", paused).finish()
      }
    }
  }
}

/// Represents the requested shutdown mode. Sent via a `watch` channel.
/// `None` indicates the scheduler is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop dispatching and wait for in-flight callbacks to complete.
  Graceful,
  /// Stop processing as soon as possible.
  Force,
}

/// Message sent from a Worker back to the Coordinator after a firing.
/// Frees a worker slot so the coordinator can dispatch the next due job.
#[derive(Debug)]
pub(crate) struct WorkerOutcome {
  pub job_id: JobId,
  pub instance_id: InstanceId,
  pub succeeded: bool,
}

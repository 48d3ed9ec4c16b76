use crate::command::{ShutdownMode, WorkerOutcome};
use crate::job::{BoxedExecFn, Dispatch, InstanceId, JobId, JobPayload, WorkerId};
use crate::metrics::SchedulerMetrics;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, trace, warn, Instrument};

/// Represents a worker task responsible for executing fired jobs.
///
/// Workers wait for dispatched jobs from the Coordinator via a shared channel,
/// run the job's callback in its own task (so a panic is contained), record
/// metrics, and report back so the Coordinator can reuse the slot.
pub(crate) struct Worker {
  id: WorkerId,
  metrics: SchedulerMetrics,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  worker_outcome_tx: mpsc::Sender<WorkerOutcome>,
  // Shared by all workers; whoever holds the lock waits for the next dispatch.
  job_dispatch_rx: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
  active_workers_counter: Arc<AtomicUsize>,
}

impl Worker {
  pub fn new(
    id: WorkerId,
    metrics: SchedulerMetrics,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    worker_outcome_tx: mpsc::Sender<WorkerOutcome>,
    job_dispatch_rx: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
    active_workers_counter: Arc<AtomicUsize>,
  ) -> Self {
    Self {
      id,
      metrics,
      shutdown_rx,
      worker_outcome_tx,
      job_dispatch_rx,
      active_workers_counter,
    }
  }

  /// Runs the main loop for the worker task.
  pub async fn run(&mut self) {
    debug!(worker_id = self.id, "Worker started. Waiting for jobs...");

    loop {
      if self.is_forced() {
        break;
      }

      let dispatch_rx = self.job_dispatch_rx.clone();
      tokio::select! {
          biased;

          // Graceful shutdown keeps draining until the coordinator closes the
          // dispatch channel; only a forced shutdown stops the worker early.
          Ok(()) = self.shutdown_rx.changed() => {
              if self.is_forced() {
                  debug!(worker_id = self.id, "Worker received forced shutdown signal.");
                  break;
              }
          }

          maybe_dispatch = async move { dispatch_rx.lock().await.recv().await } => {
              match maybe_dispatch {
                  Some(dispatch) => {
                      let span = tracing::info_span!(
                          "job_exec",
                          worker_id = self.id,
                          job_id = %dispatch.job.job_id,
                          instance_id = %dispatch.instance_id,
                      );
                      self.execute_and_handle(dispatch).instrument(span).await;
                  }
                  None => {
                      debug!(worker_id = self.id, "Job dispatch channel closed. Worker exiting.");
                      break;
                  }
              }
          }
      }
    }

    debug!(worker_id = self.id, "Worker task shutting down.");
  }

  fn is_forced(&self) -> bool {
    *self.shutdown_rx.borrow() == Some(ShutdownMode::Force)
  }

  /// Executes the callback, records metrics, frees the worker slot and
  /// reports the outcome.
  async fn execute_and_handle(&self, dispatch: Dispatch) {
    let Dispatch {
      job,
      exec_fn,
      instance_id,
    } = dispatch;

    let lag = Utc::now().signed_duration_since(job.fire_at);
    match lag.to_std() {
      Ok(lag) => {
        self.metrics.job_fire_lag.record(lag);
        trace!(lag_ms = lag.as_millis(), "Recorded fire lag.");
      }
      Err(_) => warn!(fire_at = %job.fire_at, "Job dispatched before its fire time?"),
    }

    let start = Instant::now();
    let succeeded = self
      .execute_job_logic(&exec_fn, job.payload.clone(), &job.job_id, instance_id)
      .await;
    let duration = start.elapsed();
    self.metrics.job_execution_duration.record(duration);
    info!(
      duration_ms = duration.as_millis(),
      succeeded,
      "Finished job execution."
    );

    let prev_count = self
      .active_workers_counter
      .fetch_sub(1, AtomicOrdering::Relaxed);
    self
      .metrics
      .workers_active_current
      .store(prev_count.saturating_sub(1), AtomicOrdering::Relaxed);

    let outcome = WorkerOutcome {
      job_id: job.job_id,
      instance_id,
      succeeded,
    };
    if self.worker_outcome_tx.send(outcome).await.is_err() {
      warn!(
        worker_id = self.id,
        "Failed to send job outcome to coordinator (scheduler likely shutdown)."
      );
    }
  }

  /// Runs the callback in its own task so a panic cannot take the worker down.
  async fn execute_job_logic(
    &self,
    exec_fn: &Arc<BoxedExecFn>,
    payload: JobPayload,
    job_id: &JobId,
    instance_id: InstanceId,
  ) -> bool {
    let future_to_run = exec_fn(payload);

    match tokio::spawn(future_to_run).await {
      Ok(true) => {
        self
          .metrics
          .jobs_executed_success
          .fetch_add(1, AtomicOrdering::Relaxed);
        true
      }
      Ok(false) => {
        self
          .metrics
          .jobs_executed_fail
          .fetch_add(1, AtomicOrdering::Relaxed);
        false
      }
      Err(join_error) if join_error.is_panic() => {
        error!(%job_id, %instance_id, "Job callback panicked!");
        self
          .metrics
          .jobs_panicked
          .fetch_add(1, AtomicOrdering::Relaxed);
        false
      }
      Err(_) => {
        warn!(%job_id, %instance_id, "Job task was cancelled during execution.");
        self
          .metrics
          .jobs_executed_fail
          .fetch_add(1, AtomicOrdering::Relaxed);
        false
      }
    }
  }
}

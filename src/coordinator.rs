use crate::command::{CoordinatorCommand, ShutdownMode, WorkerOutcome};
use crate::job::{Dispatch, JobEntry, JobId, ScheduledJob};
use crate::metrics::SchedulerMetrics;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Poll interval while waiting for in-flight callbacks during graceful shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
/// Sleep used when nothing can be dispatched; any command or outcome wakes the loop earlier.
const IDLE_SLEEP: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Channels and shared counters handed to the Coordinator task.
#[derive(Debug)]
pub(crate) struct CoordinatorState {
  // Receivers
  cmd_rx: mpsc::Receiver<CoordinatorCommand>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  worker_outcome_rx: mpsc::Receiver<WorkerOutcome>,
  // Sender
  job_dispatch_tx: mpsc::Sender<Dispatch>,
  // Metrics & Counters
  metrics: SchedulerMetrics,
  active_workers_counter: Arc<AtomicUsize>,
  max_workers: usize,
  start_paused: bool,
}

impl CoordinatorState {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    cmd_rx: mpsc::Receiver<CoordinatorCommand>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    worker_outcome_rx: mpsc::Receiver<WorkerOutcome>,
    job_dispatch_tx: mpsc::Sender<Dispatch>,
    metrics: SchedulerMetrics,
    active_workers_counter: Arc<AtomicUsize>,
    max_workers: usize,
    start_paused: bool,
  ) -> Self {
    Self {
      cmd_rx,
      shutdown_rx,
      worker_outcome_rx,
      job_dispatch_tx,
      metrics,
      active_workers_counter,
      max_workers,
      start_paused,
    }
  }
}

/// The central Coordinator task: sole owner of the pending-job table.
///
/// Every mutation (schedule, cancel) arrives as a command, so the table needs
/// no lock. The handle-based priority queue is keyed by `JobId`, which makes a
/// reschedule re-prioritize the existing entry instead of adding a second one.
pub(crate) struct Coordinator {
  state: CoordinatorState,
  pq: PriorityQueue<JobId, Reverse<DateTime<Utc>>>,
  jobs: HashMap<JobId, JobEntry>,
  paused: bool,
  shutting_down: Option<ShutdownMode>,
  cmd_closed: bool,
  outcomes_closed: bool,
}

impl Coordinator {
  pub fn new(state: CoordinatorState) -> Self {
    let paused = state.start_paused;
    Self {
      state,
      pq: PriorityQueue::new(),
      jobs: HashMap::new(),
      paused,
      shutting_down: None,
      cmd_closed: false,
      outcomes_closed: false,
    }
  }

  /// Runs the main event loop for the Coordinator.
  pub async fn run(&mut self) {
    info!(paused = self.paused, "Coordinator started.");

    loop {
      self.update_gauge_metrics();
      let sleep_duration = self.calculate_sleep();

      tokio::select! {
          biased;

          // --- Shutdown Check ---
          Ok(()) = self.state.shutdown_rx.changed() => {
              let mode = *self.state.shutdown_rx.borrow();
              if mode.is_some() && mode != self.shutting_down {
                  self.shutting_down = mode;
                  info!(?mode, pending = self.jobs.len(), "Coordinator received shutdown signal.");
                  if mode == Some(ShutdownMode::Force) {
                      break;
                  }
              }
          },

          // --- Command Processing ---
          // Commands are served during graceful shutdown too, so late
          // cancels and lists still get an answer.
          maybe_cmd = self.state.cmd_rx.recv(), if !self.cmd_closed => {
              match maybe_cmd {
                  Some(cmd) => self.handle_command(cmd),
                  None => {
                      self.cmd_closed = true;
                      if self.shutting_down.is_none() {
                          warn!("Command channel closed unexpectedly. Initiating graceful shutdown.");
                          self.shutting_down = Some(ShutdownMode::Graceful);
                      }
                  }
              }
          },

          // --- Worker Outcome Processing ---
          maybe_outcome = self.state.worker_outcome_rx.recv(), if !self.outcomes_closed => {
              match maybe_outcome {
                  Some(outcome) => self.handle_worker_outcome(outcome),
                  None => {
                      self.outcomes_closed = true;
                      if self.shutting_down.is_none() {
                          error!("Worker outcome channel closed unexpectedly!");
                      }
                  }
              }
          },

          // --- Timer Wakeup ---
          _ = sleep(sleep_duration) => {
              trace!("Timer fired.");
              self.try_dispatch_jobs().await;
          }
      }

      if self.shutting_down == Some(ShutdownMode::Graceful) {
        let active_count = self
          .state
          .active_workers_counter
          .load(AtomicOrdering::Relaxed);
        if active_count == 0 {
          info!(
            undispatched = self.jobs.len(),
            "Graceful shutdown: all workers idle. Coordinator exiting."
          );
          break;
        }
        trace!(
          active_workers = active_count,
          "Graceful shutdown: waiting for in-flight callbacks."
        );
      }
    }

    info!("Coordinator task shutting down.");
    // Dropping the coordinator drops `job_dispatch_tx`, which lets idle workers exit.
  }

  fn update_gauge_metrics(&self) {
    self
      .state
      .metrics
      .job_queue_scheduled_current
      .store(self.pq.len(), AtomicOrdering::Relaxed);
    self.state.metrics.workers_active_current.store(
      self
        .state
        .active_workers_counter
        .load(AtomicOrdering::Relaxed),
      AtomicOrdering::Relaxed,
    );
  }

  fn handle_command(&mut self, cmd: CoordinatorCommand) {
    match cmd {
      CoordinatorCommand::Schedule {
        job,
        exec_fn,
        responder,
      } => {
        let job_id = job.job_id.clone();
        let fire_at = job.fire_at;
        let instance_id = Uuid::new_v4();
        let replaced = self
          .jobs
          .insert(
            job_id.clone(),
            JobEntry {
              job,
              exec_fn,
              instance_id,
            },
          )
          .is_some();
        // push() updates the priority in place when the id is already queued.
        self.pq.push(job_id.clone(), Reverse(fire_at));

        if replaced {
          self
            .state
            .metrics
            .jobs_replaced
            .fetch_add(1, AtomicOrdering::Relaxed);
          debug!(%job_id, %instance_id, %fire_at, "Replaced pending job.");
        } else {
          self
            .state
            .metrics
            .jobs_scheduled
            .fetch_add(1, AtomicOrdering::Relaxed);
          debug!(%job_id, %instance_id, %fire_at, "Scheduled job.");
        }
        let _ = responder.send(replaced);
      }
      CoordinatorCommand::Cancel { job_id, responder } => {
        let removed = self.jobs.remove(&job_id).is_some();
        self.pq.remove(&job_id);
        if removed {
          self
            .state
            .metrics
            .jobs_cancelled
            .fetch_add(1, AtomicOrdering::Relaxed);
          debug!(%job_id, "Cancelled pending job.");
        } else {
          trace!(%job_id, "Cancel for job that is not pending; nothing to do.");
        }
        let _ = responder.send(removed);
      }
      CoordinatorCommand::List { responder } => {
        let mut jobs: Vec<ScheduledJob> = self.jobs.values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| {
          a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.job_id.cmp(&b.job_id))
        });
        let _ = responder.send(jobs);
      }
      CoordinatorCommand::GetMetricsSnapshot { responder } => {
        let _ = responder.send(self.state.metrics.snapshot());
      }
      CoordinatorCommand::SetPaused { paused, responder } => {
        if self.paused != paused {
          info!(paused, pending = self.jobs.len(), "Dispatch pause state changed.");
        }
        self.paused = paused;
        let _ = responder.send(());
      }
    }
  }

  fn handle_worker_outcome(&mut self, outcome: WorkerOutcome) {
    trace!(
      job_id = %outcome.job_id,
      instance_id = %outcome.instance_id,
      succeeded = outcome.succeeded,
      "Worker finished firing."
    );
  }

  /// Pops every due job (up to the free worker capacity) and dispatches it.
  async fn try_dispatch_jobs(&mut self) {
    if self.paused || self.shutting_down.is_some() {
      return;
    }

    let now = Utc::now();
    loop {
      let active_workers = self
        .state
        .active_workers_counter
        .load(AtomicOrdering::Relaxed);
      if active_workers >= self.state.max_workers {
        trace!(
          "Dispatch check: All workers busy ({}/{})",
          active_workers,
          self.state.max_workers
        );
        break;
      }

      match self.pq.peek() {
        Some((_, Reverse(fire_at))) if *fire_at <= now => {}
        Some(_) => {
          trace!("Dispatch check: Top job is in the future.");
          break;
        }
        None => {
          trace!("Dispatch check: queue is empty.");
          break;
        }
      }

      let Some((job_id, _)) = self.pq.pop() else {
        break;
      };
      let Some(entry) = self.jobs.remove(&job_id) else {
        warn!(%job_id, "Popped job id has no table entry! Discarding.");
        continue;
      };

      let prev_active = self
        .state
        .active_workers_counter
        .fetch_add(1, AtomicOrdering::Relaxed);
      self
        .state
        .metrics
        .workers_active_current
        .store(prev_active + 1, AtomicOrdering::Relaxed);

      let dispatch = Dispatch {
        job: entry.job,
        exec_fn: entry.exec_fn,
        instance_id: entry.instance_id,
      };
      trace!(?dispatch, "Dispatching due job.");

      if let Err(e) = self.state.job_dispatch_tx.send(dispatch).await {
        error!(%job_id, "Failed to dispatch job, worker channel closed. Job lost: {:?}", e.0);
        let prev = self
          .state
          .active_workers_counter
          .fetch_sub(1, AtomicOrdering::Relaxed);
        self
          .state
          .metrics
          .workers_active_current
          .store(prev.saturating_sub(1), AtomicOrdering::Relaxed);
        break;
      }
      self
        .state
        .metrics
        .jobs_dispatched
        .fetch_add(1, AtomicOrdering::Relaxed);
    }
  }

  /// How long to sleep before the next dispatch check.
  fn calculate_sleep(&self) -> Duration {
    if self.shutting_down.is_some() {
      return SHUTDOWN_POLL;
    }
    if self.paused {
      return IDLE_SLEEP;
    }
    let active_workers = self
      .state
      .active_workers_counter
      .load(AtomicOrdering::Relaxed);
    if active_workers >= self.state.max_workers {
      // A worker outcome wakes the loop when a slot frees up.
      return IDLE_SLEEP;
    }

    match self.pq.peek() {
      Some((_, Reverse(next_run_dt))) => {
        let now = Utc::now();
        if *next_run_dt <= now {
          return Duration::ZERO;
        }
        match (*next_run_dt - now).to_std() {
          Ok(d) => d.clamp(Duration::from_millis(1), IDLE_SLEEP),
          Err(e) => {
            warn!(error = %e, "Failed to convert chrono duration. Minimal sleep.");
            Duration::from_millis(10)
          }
        }
      }
      None => IDLE_SLEEP,
    }
  }
}

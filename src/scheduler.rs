use crate::command::{CoordinatorCommand, ShutdownMode, WorkerOutcome};
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::error::{BuildError, QueryError, ShutdownError};
use crate::job::{BoxedExecFn, Dispatch, JobId, JobPayload, ScheduledJob};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::worker::Worker;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_COMMAND_BOUND: usize = 128;
const DEFAULT_MAX_WORKERS: usize = 4;

/// Builder for configuring and creating a [`JobScheduler`] instance.
///
/// # Example
///
/// ```no_run
/// use duekeeper::JobScheduler;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let timer = JobScheduler::builder()
///   .max_workers(2)
///   .start_paused(true)
///   .build()?;
/// timer.resume().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
  max_workers: usize,
  command_buffer_size: usize,
  start_paused: bool,
}

impl Default for SchedulerBuilder {
  fn default() -> Self {
    Self {
      max_workers: DEFAULT_MAX_WORKERS,
      command_buffer_size: DEFAULT_COMMAND_BOUND,
      start_paused: false,
    }
  }
}

impl SchedulerBuilder {
  /// Creates a new builder with default settings.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets how many callbacks may run at the same time. Must be non-zero.
  pub fn max_workers(mut self, count: usize) -> Self {
    self.max_workers = count;
    self
  }

  /// Sets the buffer size for the command channel. Must be > 0.
  pub fn command_buffer_size(mut self, size: usize) -> Self {
    self.command_buffer_size = size.max(1);
    self
  }

  /// When `true`, the timer accepts jobs but dispatches nothing until
  /// [`JobScheduler::resume`] is called.
  pub fn start_paused(mut self, paused: bool) -> Self {
    self.start_paused = paused;
    self
  }

  /// Spawns the coordinator and worker tasks on the current tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if called outside of a tokio runtime context.
  pub fn build(self) -> Result<JobScheduler, BuildError> {
    if self.max_workers == 0 {
      return Err(BuildError::MissingOrZeroMaxWorkers);
    }
    let max_workers = self.max_workers;

    // --- Initialize Shared State & Channels ---
    let metrics = SchedulerMetrics::new();
    let active_workers_counter = Arc::new(AtomicUsize::new(0));

    let (cmd_tx, cmd_rx) = mpsc::channel::<CoordinatorCommand>(self.command_buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);
    // The coordinator never dispatches more than `max_workers` at a time.
    let (job_dispatch_tx, job_dispatch_rx) = mpsc::channel::<Dispatch>(max_workers);
    let job_dispatch_rx = Arc::new(Mutex::new(job_dispatch_rx));
    let (worker_outcome_tx, worker_outcome_rx) =
      mpsc::channel::<WorkerOutcome>(self.command_buffer_size);

    // --- Spawn Coordinator ---
    let coordinator_state = CoordinatorState::new(
      cmd_rx,
      shutdown_rx.clone(),
      worker_outcome_rx,
      job_dispatch_tx,
      metrics.clone(),
      active_workers_counter.clone(),
      max_workers,
      self.start_paused,
    );

    let coordinator_handle = Handle::current().spawn(async move {
      let mut coordinator = Coordinator::new(coordinator_state);
      coordinator.run().await;
      info!("Coordinator task finished.");
    });

    // --- Spawn Workers ---
    let mut worker_handles = Vec::with_capacity(max_workers);
    for worker_id in 0..max_workers {
      let mut worker = Worker::new(
        worker_id,
        metrics.clone(),
        shutdown_rx.clone(),
        worker_outcome_tx.clone(),
        job_dispatch_rx.clone(),
        active_workers_counter.clone(),
      );
      let handle = Handle::current().spawn(async move {
        worker.run().await;
      });
      worker_handles.push(handle);
    }
    // Workers hold the clones.
    drop(worker_outcome_tx);

    info!(max_workers, paused = self.start_paused, "Job scheduler started.");

    Ok(JobScheduler {
      cmd_tx,
      shutdown_tx,
      coordinator_handle: Arc::new(Mutex::new(Some(coordinator_handle))),
      worker_handles: Arc::new(Mutex::new(worker_handles)),
    })
  }
}

/// In-process timer engine: fires a callback at an absolute instant, once.
///
/// Jobs are keyed by [`JobId`]. Scheduling an id that is already pending
/// replaces it; cancelling an unknown id is a no-op. A `fire_at` in the past
/// is accepted and fires as soon as a worker is free.
///
/// Use [`JobScheduler::builder()`] to create an instance.
#[derive(Debug)]
pub struct JobScheduler {
  cmd_tx: mpsc::Sender<CoordinatorCommand>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  // Task handles for shutdown
  coordinator_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
  worker_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobScheduler {
  /// Returns a builder to configure and create a `JobScheduler` instance.
  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
  }

  /// Registers a job, replacing any pending job with the same id.
  ///
  /// Returns `true` if a pending job was replaced.
  ///
  /// # Errors
  ///
  /// - [`QueryError::SchedulerShutdown`]: Scheduler is not running.
  /// - [`QueryError::ResponseFailed`]: Coordinator failed to respond.
  pub async fn schedule<F>(
    &self,
    job_id: JobId,
    fire_at: DateTime<Utc>,
    payload: JobPayload,
    exec_fn: F,
  ) -> Result<bool, QueryError>
  where
    F: Fn(JobPayload) -> Pin<Box<dyn Future<Output = bool> + Send + 'static>>
      + Send
      + Sync
      + 'static,
  {
    let job = ScheduledJob::new(job_id, fire_at, payload);
    self
      .schedule_shared(job, Arc::new(Box::new(exec_fn) as BoxedExecFn))
      .await
  }

  /// Same as [`JobScheduler::schedule`] for a callback that is already shared.
  pub async fn schedule_shared(
    &self,
    job: ScheduledJob,
    exec_fn: Arc<BoxedExecFn>,
  ) -> Result<bool, QueryError> {
    let (responder, response_rx) = oneshot::channel();
    let cmd = CoordinatorCommand::Schedule {
      job,
      exec_fn,
      responder,
    };
    self
      .cmd_tx
      .send(cmd)
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)
  }

  /// Removes a pending job.
  ///
  /// Returns `true` if a job was removed and `false` if none was pending.
  /// Does not stop a callback that has already been dispatched.
  ///
  /// # Errors
  ///
  /// - [`QueryError::SchedulerShutdown`]: Scheduler is not running.
  /// - [`QueryError::ResponseFailed`]: Coordinator failed to respond.
  pub async fn cancel(&self, job_id: &JobId) -> Result<bool, QueryError> {
    let (responder, response_rx) = oneshot::channel();
    let cmd = CoordinatorCommand::Cancel {
      job_id: job_id.clone(),
      responder,
    };
    self
      .cmd_tx
      .send(cmd)
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)
  }

  /// Lists all pending jobs, ordered by `fire_at` then job id.
  pub async fn list(&self) -> Result<Vec<ScheduledJob>, QueryError> {
    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(CoordinatorCommand::List { responder })
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)
  }

  /// Retrieves a snapshot of the current timer metrics.
  pub async fn get_metrics_snapshot(&self) -> Result<MetricsSnapshot, QueryError> {
    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(CoordinatorCommand::GetMetricsSnapshot { responder })
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)
  }

  /// Stops dispatching due jobs. Pending jobs are kept and still accept
  /// schedule/cancel.
  pub async fn pause(&self) -> Result<(), QueryError> {
    self.set_paused(true).await
  }

  /// Restarts dispatching; anything that became due while paused fires now.
  pub async fn resume(&self) -> Result<(), QueryError> {
    self.set_paused(false).await
  }

  async fn set_paused(&self, paused: bool) -> Result<(), QueryError> {
    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(CoordinatorCommand::SetPaused { paused, responder })
      .await
      .map_err(|_| QueryError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| QueryError::ResponseFailed)
  }

  /// Initiates a graceful shutdown.
  ///
  /// Stops dispatching new firings and waits for in-flight callbacks to
  /// complete. Jobs still pending are dropped.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::SignalFailed`]: Failed to send the shutdown signal.
  /// - [`ShutdownError::Timeout`]: Waiting for tasks exceeded the timeout.
  /// - [`ShutdownError::TaskPanic`]: A worker or coordinator task panicked.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Graceful))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown. Workers stop taking jobs immediately;
  /// callbacks already spawned run to completion on the runtime.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Force))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Helper to wait for task handles during shutdown.
  async fn await_shutdown(&self, timeout_duration: Option<Duration>) -> Result<(), ShutdownError> {
    let coordinator_handle = self.coordinator_handle.lock().await.take();
    let worker_handles = {
      let mut guard = self.worker_handles.lock().await;
      std::mem::take(&mut *guard)
    };

    let mut tasks = Vec::with_capacity(1 + worker_handles.len());
    if let Some(coord_handle) = coordinator_handle {
      tasks.push(tokio::spawn(async move {
        coord_handle.await.map_err(|e| {
          error!("Coordinator task panicked: {:?}", e);
          ShutdownError::TaskPanic
        })
      }));
    } else {
      warn!("Coordinator handle missing during shutdown wait (already shut down?).");
    }

    for (i, handle) in worker_handles.into_iter().enumerate() {
      tasks.push(tokio::spawn(async move {
        handle.await.map_err(|e| {
          error!(worker_id = i, "Worker task panicked: {:?}", e);
          ShutdownError::TaskPanic
        })
      }));
    }

    if tasks.is_empty() {
      return Ok(());
    }

    let join_all_fut = async {
      let results = try_join_all(tasks).await.map_err(|join_err| {
        error!("A shutdown wait task panicked: {:?}", join_err);
        ShutdownError::TaskPanic
      })?;
      results.into_iter().collect::<Result<Vec<()>, ShutdownError>>()
    };

    let result = match timeout_duration {
      Some(timeout) => match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(inner) => inner.map(|_| ()),
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          Err(ShutdownError::Timeout)
        }
      },
      None => join_all_fut.await.map(|_| ()),
    };

    if result.is_ok() {
      info!("All scheduler tasks joined successfully.");
    } else {
      error!("Error during shutdown task joining: {:?}", result);
    }
    result
  }
}

use crate::config::{offset_from_secs, EngineConfig};
use crate::error::{BuildError, EngineError, ShutdownError};
use crate::job::{BoxedExecFn, JobPayload, ScheduledJob};
use crate::lookup::{ParticipantLookup, TaskNameLookup};
use crate::metrics::MetricsSnapshot;
use crate::notify::{EventTransport, NotificationEmitter};
use crate::occurrence::OccurrenceCalculator;
use crate::record::ScheduleRecord;
use crate::rehydrate::RehydrationReport;
use crate::scheduler::JobScheduler;
use crate::store::ScheduleStore;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{debug, error, info, warn};

/// Builder for [`DueKeeper`].
///
/// The store, both lookups and the event transport are required.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use duekeeper::{DueKeeper, InMemoryScheduleStore};
/// use duekeeper::http::{HttpEventTransport, HttpTaskDirectory};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = DueKeeper::builder()
///   .store(Arc::new(InMemoryScheduleStore::new()))
///   .directory(Arc::new(HttpTaskDirectory::new("http://tasks.internal")))
///   .transport(Arc::new(HttpEventTransport::new("http://events.internal")))
///   .max_workers(8)
///   .start_paused(true)
///   .build()?;
/// let report = engine.start().await?;
/// println!("re-armed {} recurring jobs", report.recurring_armed);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DueKeeperBuilder {
  store: Option<Arc<dyn ScheduleStore>>,
  task_names: Option<Arc<dyn TaskNameLookup>>,
  participants: Option<Arc<dyn ParticipantLookup>>,
  transport: Option<Arc<dyn EventTransport>>,
  business_offset_secs: Option<i32>,
  config: EngineConfig,
}

impl fmt::Debug for DueKeeperBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DueKeeperBuilder")
      .field("store", &self.store.is_some())
      .field("task_names", &self.task_names.is_some())
      .field("participants", &self.participants.is_some())
      .field("transport", &self.transport.is_some())
      .field("config", &self.config)
      .finish()
  }
}

impl DueKeeperBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn task_names(mut self, lookup: Arc<dyn TaskNameLookup>) -> Self {
    self.task_names = Some(lookup);
    self
  }

  pub fn participants(mut self, lookup: Arc<dyn ParticipantLookup>) -> Self {
    self.participants = Some(lookup);
    self
  }

  /// Uses one service for both the task name and participant lookups.
  pub fn directory<D>(self, directory: Arc<D>) -> Self
  where
    D: TaskNameLookup + ParticipantLookup + 'static,
  {
    self
      .task_names(directory.clone())
      .participants(directory)
  }

  pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
    self.transport = Some(transport);
    self
  }

  /// Business time zone as seconds east of UTC. Defaults to UTC+08:00.
  pub fn business_offset_secs(mut self, secs: i32) -> Self {
    self.business_offset_secs = Some(secs);
    self
  }

  /// Lead time of the approaching notice. Defaults to 3 days.
  pub fn approaching_lead(mut self, lead: ChronoDuration) -> Self {
    self.config.approaching_lead = lead;
    self
  }

  /// Gap between consecutive `Immediate` occurrences. Defaults to 1 minute.
  pub fn immediate_buffer(mut self, buffer: ChronoDuration) -> Self {
    self.config.immediate_buffer = buffer;
    self
  }

  pub fn notification_topic(mut self, topic: impl Into<String>) -> Self {
    self.config.notification_topic = topic.into();
    self
  }

  pub fn task_name_placeholder(mut self, placeholder: impl Into<String>) -> Self {
    self.config.task_name_placeholder = placeholder.into();
    self
  }

  pub fn max_workers(mut self, count: usize) -> Self {
    self.config.max_workers = count;
    self
  }

  pub fn start_paused(mut self, paused: bool) -> Self {
    self.config.start_paused = paused;
    self
  }

  /// Builds the engine and spawns its timer on the current tokio runtime.
  pub fn build(self) -> Result<DueKeeper, BuildError> {
    let mut config = self.config;
    if let Some(secs) = self.business_offset_secs {
      config.business_offset = offset_from_secs(secs)?;
    }
    let store = self.store.ok_or(BuildError::MissingCollaborator("store"))?;
    let task_names = self
      .task_names
      .ok_or(BuildError::MissingCollaborator("task_names"))?;
    let participants = self
      .participants
      .ok_or(BuildError::MissingCollaborator("participants"))?;
    let transport = self
      .transport
      .ok_or(BuildError::MissingCollaborator("transport"))?;

    let scheduler = JobScheduler::builder()
      .max_workers(config.max_workers)
      .start_paused(config.start_paused)
      .build()?;

    let emitter = NotificationEmitter::new(transport, config.notification_topic.clone());
    let calculator = OccurrenceCalculator::new(config.immediate_buffer);

    let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
      scheduler,
      store,
      task_names,
      participants,
      emitter,
      config,
      calculator,
      on_fire: firing_callback(weak.clone()),
    });

    Ok(DueKeeper { inner })
  }
}

pub(crate) struct Inner {
  pub(crate) scheduler: JobScheduler,
  pub(crate) store: Arc<dyn ScheduleStore>,
  pub(crate) task_names: Arc<dyn TaskNameLookup>,
  pub(crate) participants: Arc<dyn ParticipantLookup>,
  pub(crate) emitter: NotificationEmitter,
  pub(crate) config: EngineConfig,
  pub(crate) calculator: OccurrenceCalculator,
  /// Shared by every job the engine arms; routes on the payload kind.
  pub(crate) on_fire: Arc<BoxedExecFn>,
}

/// The recurring and deadline scheduling engine.
///
/// Owns one timer and the collaborators its firings call. Cloning is cheap
/// and every clone drives the same timer, so build one per process and hand
/// clones to whatever needs to schedule or cancel.
///
/// Firings always refetch the schedule record and treat the stored state as
/// authoritative, so a firing that races a cancel or an external edit turns
/// into a logged no-op.
#[derive(Clone)]
pub struct DueKeeper {
  pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for DueKeeper {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DueKeeper")
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

// Callbacks hold a weak reference so the timer (owned by `Inner`) does not
// keep the engine alive.
fn firing_callback(inner: Weak<Inner>) -> Arc<BoxedExecFn> {
  let exec_fn = move |payload: JobPayload| {
    let inner = inner.clone();
    let fut: Pin<Box<dyn Future<Output = bool> + Send + 'static>> = Box::pin(async move {
      match inner.upgrade() {
        Some(inner) => DueKeeper { inner }.handle_firing(payload).await,
        None => {
          warn!(?payload, "Engine dropped before the job fired. Ignoring.");
          false
        }
      }
    });
    fut
  };
  Arc::new(Box::new(exec_fn) as BoxedExecFn)
}

impl DueKeeper {
  /// Returns a builder to configure and create a `DueKeeper`.
  pub fn builder() -> DueKeeperBuilder {
    DueKeeperBuilder::new()
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  /// The underlying timer, for registering custom jobs.
  pub fn scheduler(&self) -> &JobScheduler {
    &self.inner.scheduler
  }

  pub fn emitter(&self) -> &NotificationEmitter {
    &self.inner.emitter
  }

  /// Rehydrates from the store with dispatch paused, then resumes dispatch.
  ///
  /// Dispatch is resumed even when rehydration fails, so jobs scheduled by
  /// other call sites still fire.
  pub async fn start(&self) -> Result<RehydrationReport, EngineError> {
    self.inner.scheduler.pause().await?;
    let report = self.rehydrate().await;
    self.inner.scheduler.resume().await?;
    match &report {
      Ok(report) => info!(?report, "Scheduling engine started."),
      Err(e) => error!(error = %e, "Scheduling engine started without rehydration."),
    }
    report
  }

  pub async fn pause(&self) -> Result<(), EngineError> {
    Ok(self.inner.scheduler.pause().await?)
  }

  pub async fn resume(&self) -> Result<(), EngineError> {
    Ok(self.inner.scheduler.resume().await?)
  }

  /// All pending jobs, ordered by fire time.
  pub async fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>, EngineError> {
    Ok(self.inner.scheduler.list().await?)
  }

  pub async fn get_metrics_snapshot(&self) -> Result<MetricsSnapshot, EngineError> {
    Ok(self.inner.scheduler.get_metrics_snapshot().await?)
  }

  /// Stops firing new jobs and waits for in-flight firings to finish.
  pub async fn shutdown(&self) -> Result<(), ShutdownError> {
    self.inner.scheduler.shutdown_graceful(None).await
  }

  pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), ShutdownError> {
    self.inner.scheduler.shutdown_graceful(Some(timeout)).await
  }

  /// Fetches the authoritative copy of a record.
  pub(crate) async fn fetch(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>, EngineError> {
    self
      .inner
      .store
      .get_by_id(schedule_id)
      .await
      .map_err(EngineError::StoreRead)
  }

  async fn handle_firing(&self, payload: JobPayload) -> bool {
    match payload {
      JobPayload::Recurring {
        schedule_id,
        frequency,
      } => match self.process_recurring_task(&schedule_id, frequency).await {
        Ok(outcome) => {
          debug!(%schedule_id, ?outcome, "Recurring firing handled.");
          true
        }
        Err(e) => {
          error!(%schedule_id, error = %e, "Recurring firing failed.");
          false
        }
      },
      JobPayload::Deadline { schedule_id } => {
        match self.process_deadline_reached(&schedule_id).await {
          Ok(outcome) => {
            debug!(%schedule_id, ?outcome, "Overdue firing handled.");
            true
          }
          Err(e) => {
            error!(%schedule_id, error = %e, "Overdue firing failed.");
            false
          }
        }
      }
      JobPayload::DeadlineApproaching { schedule_id } => {
        match self.process_deadline_approaching(&schedule_id).await {
          Ok(outcome) => {
            debug!(%schedule_id, ?outcome, "Approaching firing handled.");
            true
          }
          Err(e) => {
            error!(%schedule_id, error = %e, "Approaching firing failed.");
            false
          }
        }
      }
      JobPayload::Custom { value } => {
        warn!(%value, "Engine callback received a custom payload. Ignoring.");
        false
      }
    }
  }
}

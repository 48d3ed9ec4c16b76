//! DueKeeper: Recurring & Deadline Task Scheduling
//!
//! Given a task's schedule record (start, deadline, recurrence frequency),
//! DueKeeper computes future occurrences, fires one-shot timers at precise
//! instants, regenerates the next occurrence when one fires, watches
//! approaching and overdue deadlines, and emits one notification per
//! recipient per transition.
//!
//! # Features
//!
//! - Occurrence arithmetic in a fixed business time zone (UTC+08:00 by
//!   default) for `Weekly`, `Monthly`, `Yearly` and `Immediate` recurrence,
//!   with calendar-aware day-of-month clamping.
//! - An in-process timer ([`JobScheduler`]) keyed by deterministic job ids:
//!   scheduling an id again replaces the pending job, cancelling is
//!   idempotent, and a `fire_at` in the past fires as soon as possible.
//! - Recurrence processing: each firing creates the next schedule record
//!   and re-arms both the recurring job and the deadline watches.
//! - Deadline monitoring: an approaching notice (3 days ahead by default)
//!   and an overdue transition that is persisted before anyone is notified.
//! - Startup rehydration from the schedule store, with a catch-up pass for
//!   deadlines missed while the process was down.
//! - Pluggable collaborators ([`ScheduleStore`], [`TaskNameLookup`],
//!   [`ParticipantLookup`], [`EventTransport`]) with an in-memory store and
//!   `reqwest`-backed HTTP clients (requires the `http` feature).
//! - Built-in timer metrics (queryable snapshot using `MetricsSnapshot`).
//! - Graceful shutdown with optional timeout.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chrono::{FixedOffset, TimeZone};
//! use duekeeper::{DueKeeper, Frequency, InMemoryScheduleStore, NewScheduleRecord, ScheduleStore};
//! use duekeeper::http::{HttpEventTransport, HttpTaskDirectory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryScheduleStore::new());
//!     let engine = DueKeeper::builder()
//!         .store(store.clone())
//!         .directory(Arc::new(HttpTaskDirectory::new("http://tasks.internal")))
//!         .transport(Arc::new(HttpEventTransport::new("http://events.internal")))
//!         .build()?;
//!
//!     // Re-arm everything persisted before the restart.
//!     let report = engine.start().await?;
//!     println!("Rehydrated: {:?}", report);
//!
//!     // A new weekly task.
//!     let tz = FixedOffset::east_opt(8 * 3600).unwrap();
//!     let start = tz.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap();
//!     let deadline = tz.with_ymd_and_hms(2030, 1, 9, 17, 0, 0).unwrap();
//!     let next = duekeeper::next_occurrence(Frequency::Weekly, start, deadline)?;
//!     let record = store
//!         .create(NewScheduleRecord::recurring("task-42", start, deadline, Frequency::Weekly, next)?)
//!         .await?;
//!
//!     engine.schedule_recurring_task(&record).await?;
//!     engine.schedule_deadline_monitoring(&record).await?;
//!
//!     for job in engine.list_scheduled_jobs().await? {
//!         println!("{} fires at {}", job.job_id, job.fire_at);
//!     }
//!
//!     engine.shutdown_with_timeout(Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use [`DueKeeperBuilder`] to configure the engine:
//! - `store`, `task_names`, `participants` (or `directory` for both), `transport`: required collaborators.
//! - `business_offset_secs`, `approaching_lead`, `immediate_buffer`: time arithmetic.
//! - `notification_topic`, `task_name_placeholder`: notification shape.
//! - `max_workers`: how many firings may run at once.
//! - `start_paused`: accept jobs but fire nothing until `start()` or `resume()`.
//!
//! # Consistency
//!
//! The timer table lives only in memory; the schedule store is the source of
//! truth. Every firing refetches its record and no-ops if the record is gone
//! or already in a state that makes the firing irrelevant, so firings that
//! race a cancel or an external edit are harmless.
//!
//! # Observability
//!
//! - Retrieve metrics snapshots using [`DueKeeper::get_metrics_snapshot`]. See [`MetricsSnapshot`].
//! - List pending jobs with [`DueKeeper::list_scheduled_jobs`].
//! - Integrate with the `tracing` crate for detailed logs.

mod command;
pub mod config;
mod coordinator;
pub mod deadline;
pub mod engine;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod job;
pub mod lookup;
pub mod metrics;
pub mod notify;
pub mod occurrence;
pub mod recurrence;
pub mod record;
pub mod rehydrate;
pub mod scheduler;
pub mod store;
mod worker;

// --- Public Re-exports ---

// Engine
pub use engine::{DueKeeper, DueKeeperBuilder};
pub use config::EngineConfig;
pub use deadline::{DeadlineOutcome, DeadlineWatches};
pub use recurrence::RecurrenceOutcome;
pub use rehydrate::RehydrationReport;

// Timer
pub use command::ShutdownMode;
pub use scheduler::{JobScheduler, SchedulerBuilder};

// Error types
pub use error::{
  BuildError, EngineError, LookupError, QueryError, ShutdownError, StoreError, TransportError,
};

// Data model
pub use job::{BoxedExecFn, InstanceId, JobId, JobKind, JobPayload, ScheduledJob};
pub use occurrence::{next_occurrence, Occurrence, OccurrenceCalculator};
pub use record::{
  Frequency, NewScheduleRecord, ScheduleId, ScheduleRecord, ScheduleStatus, ScheduleUpdate, TaskId,
};

// Collaborators
pub use lookup::{Participant, ParticipantLookup, TaskNameLookup};
pub use notify::{DeliveryReport, EventTransport, EventType, NotificationEmitter, NotificationEvent};
pub use store::{InMemoryScheduleStore, ScheduleStore};

// Metrics related types
pub use metrics::{MetricsSnapshot, SchedulerMetrics};

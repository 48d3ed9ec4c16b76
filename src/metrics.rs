use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Internal state for tracking timer metrics using atomic counters.
///
/// Cloned and shared between the Coordinator and Workers. Cloning
/// only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
  // --- Counters ---
  /// Schedule commands that registered a new job id.
  pub jobs_scheduled: Arc<AtomicUsize>,
  /// Schedule commands that replaced a pending job under the same id.
  pub jobs_replaced: Arc<AtomicUsize>,
  /// Cancel commands that removed a pending job.
  pub jobs_cancelled: Arc<AtomicUsize>,
  /// Jobs popped off the queue and handed to a worker.
  pub jobs_dispatched: Arc<AtomicUsize>,
  /// Callbacks that returned `true`.
  pub jobs_executed_success: Arc<AtomicUsize>,
  /// Callbacks that returned `false` or were aborted.
  pub jobs_executed_fail: Arc<AtomicUsize>,
  /// Callbacks that panicked.
  pub jobs_panicked: Arc<AtomicUsize>,

  // --- Gauges ---
  /// Jobs currently pending in the queue.
  pub job_queue_scheduled_current: Arc<AtomicUsize>,
  /// Workers currently executing a callback.
  pub workers_active_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Callback execution time.
  pub job_execution_duration: Arc<SimpleHistogram>,
  /// Delay between a job's `fire_at` and the moment a worker picked it up.
  /// Large values indicate catch-up firings.
  pub job_fire_lag: Arc<SimpleHistogram>,
}

impl SchedulerMetrics {
  /// Creates a new `SchedulerMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_scheduled: self.jobs_scheduled.load(order),
      jobs_replaced: self.jobs_replaced.load(order),
      jobs_cancelled: self.jobs_cancelled.load(order),
      jobs_dispatched: self.jobs_dispatched.load(order),
      jobs_executed_success: self.jobs_executed_success.load(order),
      jobs_executed_fail: self.jobs_executed_fail.load(order),
      jobs_panicked: self.jobs_panicked.load(order),
      job_queue_scheduled_current: self.job_queue_scheduled_current.load(order),
      workers_active_current: self.workers_active_current.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
      job_fire_lag_count: self.job_fire_lag.get_count(),
      job_fire_lag_sum_micros: self.job_fire_lag.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the timer's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_scheduled: usize,
  pub jobs_replaced: usize,
  pub jobs_cancelled: usize,
  pub jobs_dispatched: usize,
  pub jobs_executed_success: usize,
  pub jobs_executed_fail: usize,
  pub jobs_panicked: usize,
  // Gauges
  pub job_queue_scheduled_current: usize,
  pub workers_active_current: usize,
  // Histogram Data
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
  pub job_fire_lag_count: usize,
  pub job_fire_lag_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean callback execution duration, if any callbacks completed.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    if self.job_execution_duration_count == 0 {
      None
    } else {
      let micros =
        self.job_execution_duration_sum_micros as f64 / self.job_execution_duration_count as f64;
      Some(Duration::from_micros(micros as u64))
    }
  }

  /// Mean fire lag, if any job has fired.
  pub fn mean_fire_lag(&self) -> Option<Duration> {
    if self.job_fire_lag_count == 0 {
      None
    } else {
      let micros = self.job_fire_lag_sum_micros as f64 / self.job_fire_lag_count as f64;
      Some(Duration::from_micros(micros as u64))
    }
  }
}

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};

use crate::error::BuildError;
use crate::notify::DEFAULT_NOTIFICATION_TOPIC;
use crate::occurrence::{DEFAULT_BUSINESS_OFFSET_SECS, DEFAULT_IMMEDIATE_BUFFER_SECS};

/// How far ahead of a deadline the approaching notice fires by default.
pub const DEFAULT_APPROACHING_LEAD_DAYS: i64 = 3;

/// Name used in notifications when the task name cannot be resolved.
pub const DEFAULT_TASK_NAME_PLACEHOLDER: &str = "Unknown Task";

/// Resolved engine settings. Built by [`crate::DueKeeperBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// Fixed offset all occurrence arithmetic and event timestamps use.
  pub business_offset: FixedOffset,
  pub approaching_lead: ChronoDuration,
  pub immediate_buffer: ChronoDuration,
  pub notification_topic: String,
  pub task_name_placeholder: String,
  pub max_workers: usize,
  /// Build the timer paused; nothing fires until `start()` or `resume()`.
  pub start_paused: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      business_offset: FixedOffset::east_opt(DEFAULT_BUSINESS_OFFSET_SECS).unwrap_or(Utc.fix()),
      approaching_lead: ChronoDuration::days(DEFAULT_APPROACHING_LEAD_DAYS),
      immediate_buffer: ChronoDuration::seconds(DEFAULT_IMMEDIATE_BUFFER_SECS),
      notification_topic: DEFAULT_NOTIFICATION_TOPIC.to_string(),
      task_name_placeholder: DEFAULT_TASK_NAME_PLACEHOLDER.to_string(),
      max_workers: 4,
      start_paused: false,
    }
  }
}

/// Validates an offset given in seconds east of UTC.
pub(crate) fn offset_from_secs(secs: i32) -> Result<FixedOffset, BuildError> {
  FixedOffset::east_opt(secs).ok_or(BuildError::InvalidOffset(secs))
}

//! Best-effort lookups used to enrich notifications.
//!
//! Both lookups report failure through `LookupError`; the deadline monitor
//! substitutes a placeholder name or an empty recipient list instead of
//! propagating it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LookupError;

/// A user interested in a task (owner or collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
  pub user_id: String,
  #[serde(default)]
  pub user_name: String,
  #[serde(default)]
  pub user_email: String,
  #[serde(default)]
  pub user_role: String,
  #[serde(default)]
  pub department: String,
}

/// Resolves a task's human-readable name.
#[async_trait]
pub trait TaskNameLookup: Send + Sync {
  async fn get_task_name(&self, task_id: &str) -> Result<String, LookupError>;
}

/// Resolves the participants of a task.
#[async_trait]
pub trait ParticipantLookup: Send + Sync {
  async fn get_participants(&self, task_id: &str) -> Result<Vec<Participant>, LookupError>;
}

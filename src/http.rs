//! `reqwest`-backed collaborators talking JSON to the external services.
//!
//! Routes, relative to each client's base URL:
//!
//! | Operation                | Route                            |
//! |--------------------------|----------------------------------|
//! | list schedules           | `GET /schedule`                  |
//! | get schedule             | `GET /schedule/{id}`             |
//! | create schedule          | `POST /schedule`                 |
//! | update schedule          | `PUT /schedule/{id}`             |
//! | task name                | `GET /task/{id}`                 |
//! | task participants        | `GET /task/{id}/participants`    |
//! | publish event            | `POST /topics/{topic}`           |
//!
//! A 404 on a schedule get/update means "not found"; any other non-2xx status
//! is an error.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LookupError, StoreError, TransportError};
use crate::lookup::{Participant, ParticipantLookup, TaskNameLookup};
use crate::notify::EventTransport;
use crate::record::{NewScheduleRecord, ScheduleRecord, ScheduleUpdate};
use crate::store::ScheduleStore;

fn trim_base(base_url: &str) -> String {
  base_url.trim_end_matches('/').to_string()
}

// ----------------------------------------------------------------------------
// Schedule store
// ----------------------------------------------------------------------------

/// [`ScheduleStore`] over the schedule service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpScheduleStore {
  base_url: String,
  http: Client,
}

impl HttpScheduleStore {
  pub fn new(base_url: &str) -> Self {
    Self::with_client(base_url, Client::new())
  }

  /// Uses a preconfigured client (timeouts, proxies, default headers).
  pub fn with_client(base_url: &str, http: Client) -> Self {
    Self {
      base_url: trim_base(base_url),
      http,
    }
  }

  async fn rejected(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StoreError::Rejected { status, message }
  }

  async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
      .json::<T>()
      .await
      .map_err(|e| StoreError::Decode(e.to_string()))
  }
}

fn unavailable(e: reqwest::Error) -> StoreError {
  StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl ScheduleStore for HttpScheduleStore {
  async fn create(&self, record: NewScheduleRecord) -> Result<ScheduleRecord, StoreError> {
    let url = format!("{}/schedule", self.base_url);
    let response = self
      .http
      .post(&url)
      .json(&record)
      .send()
      .await
      .map_err(unavailable)?;

    if response.status().is_success() {
      Self::decode(response).await
    } else {
      Err(Self::rejected(response).await)
    }
  }

  async fn get_by_id(&self, schedule_id: &str) -> Result<Option<ScheduleRecord>, StoreError> {
    let url = format!("{}/schedule/{}", self.base_url, schedule_id);
    let response = self.http.get(&url).send().await.map_err(unavailable)?;

    match response.status() {
      StatusCode::NOT_FOUND => Ok(None),
      s if s.is_success() => Self::decode(response).await.map(Some),
      _ => Err(Self::rejected(response).await),
    }
  }

  async fn update(
    &self,
    schedule_id: &str,
    update: ScheduleUpdate,
  ) -> Result<Option<ScheduleRecord>, StoreError> {
    let url = format!("{}/schedule/{}", self.base_url, schedule_id);
    let response = self
      .http
      .put(&url)
      .json(&update)
      .send()
      .await
      .map_err(unavailable)?;

    match response.status() {
      StatusCode::NOT_FOUND => Ok(None),
      s if s.is_success() => Self::decode(response).await.map(Some),
      _ => Err(Self::rejected(response).await),
    }
  }

  async fn list_all(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
    let url = format!("{}/schedule", self.base_url);
    let response = self.http.get(&url).send().await.map_err(unavailable)?;

    if response.status().is_success() {
      Self::decode(response).await
    } else {
      Err(Self::rejected(response).await)
    }
  }
}

// ----------------------------------------------------------------------------
// Task directory
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TaskInfo {
  #[serde(alias = "name")]
  task_name: String,
}

/// Task name and participant lookups over the task service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTaskDirectory {
  base_url: String,
  http: Client,
}

impl HttpTaskDirectory {
  pub fn new(base_url: &str) -> Self {
    Self::with_client(base_url, Client::new())
  }

  pub fn with_client(base_url: &str, http: Client) -> Self {
    Self {
      base_url: trim_base(base_url),
      http,
    }
  }

  async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, LookupError> {
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| LookupError::Unavailable(e.to_string()))?;

    if !response.status().is_success() {
      return Err(LookupError::Unavailable(format!(
        "GET {} returned status {}",
        url,
        response.status().as_u16()
      )));
    }
    response
      .json::<T>()
      .await
      .map_err(|e| LookupError::Decode(e.to_string()))
  }
}

#[async_trait]
impl TaskNameLookup for HttpTaskDirectory {
  async fn get_task_name(&self, task_id: &str) -> Result<String, LookupError> {
    let url = format!("{}/task/{}", self.base_url, task_id);
    let info: TaskInfo = self.get_json(&url).await?;
    Ok(info.task_name)
  }
}

#[async_trait]
impl ParticipantLookup for HttpTaskDirectory {
  async fn get_participants(&self, task_id: &str) -> Result<Vec<Participant>, LookupError> {
    let url = format!("{}/task/{}/participants", self.base_url, task_id);
    self.get_json(&url).await
  }
}

// ----------------------------------------------------------------------------
// Event transport
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  key: Option<&'a str>,
  value: serde_json::Value,
}

/// [`EventTransport`] posting to an event-bus HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpEventTransport {
  base_url: String,
  http: Client,
}

impl HttpEventTransport {
  pub fn new(base_url: &str) -> Self {
    Self::with_client(base_url, Client::new())
  }

  pub fn with_client(base_url: &str, http: Client) -> Self {
    Self {
      base_url: trim_base(base_url),
      http,
    }
  }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
  async fn send(
    &self,
    topic: &str,
    key: Option<&str>,
    payload: Vec<u8>,
  ) -> Result<(), TransportError> {
    let value: serde_json::Value =
      serde_json::from_slice(&payload).map_err(|e| TransportError::Encode(e.to_string()))?;
    let url = format!("{}/topics/{}", self.base_url, topic);
    let response = self
      .http
      .post(&url)
      .json(&PublishRequest { key, value })
      .send()
      .await
      .map_err(|e| TransportError::Unavailable(e.to_string()))?;

    if response.status().is_success() {
      Ok(())
    } else {
      Err(TransportError::Rejected(format!(
        "POST {} returned status {}",
        url,
        response.status().as_u16()
      )))
    }
  }
}

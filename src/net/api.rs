//! REST client for the DreamFlow API.
//!
//! Thin reqwest wrapper: one method per endpoint, no retries, no caching.
//! Response bodies are read as text first and decoded with serde so a shape
//! mismatch surfaces as [`ApiError::Malformed`] rather than a transport error.
//!
//! ERROR HANDLING
//! ==============
//! Status codes are classified per call site. On `login`/`register` a 4xx
//! means the server refused the credentials (`Rejected`); on bearer-protected
//! calls a 401 means the token is no longer honored (`Unauthorized`) and the
//! caller is expected to tear the session down.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::types::{
    Envelope, ErrorDetail, LoginRequest, RegisterRequest, Task, TaskCollection, TaskId, TaskPatch, TokenResponse,
    UserProfile,
};
use crate::config::ClientConfig;
use crate::util::filter::{FilterCriteria, TaskStats};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, reset, or similar transport failure.
    #[error("network request failed: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Login or registration was refused by the server.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// A bearer-protected call returned 401.
    #[error("authorization expired")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// Any other non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

impl ApiError {
    fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() { Self::Timeout } else { Self::Network(err.to_string()) }
    }

    /// Transport-level failures that say nothing about the request itself.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Status { status: 500..=599, .. })
    }
}

/// How a call site interprets 4xx responses.
#[derive(Debug, Clone, Copy)]
enum Guard {
    Credentials,
    Bearer,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client against `config.base_url` with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.base_url.clone() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `POST /api/login`: exchange credentials for a bearer token.
    ///
    /// # Errors
    ///
    /// `Rejected` on bad credentials; transport and shape errors otherwise.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let payload = LoginRequest { email, password };
        tracing::debug!(body = %redacted_body(&payload), "POST /api/login");
        let request = self.http.post(self.endpoint("/api/login")).json(&payload);
        let body: TokenResponse = send(request, Guard::Credentials).await?;
        if body.access_token.is_empty() {
            return Err(ApiError::Malformed("empty access_token".into()));
        }
        Ok(body.access_token)
    }

    /// `GET /api/users/me`: profile of the token's owner.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the token is not honored.
    pub async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        let request = self.http.get(self.endpoint("/api/users/me")).bearer_auth(token);
        send(request, Guard::Bearer).await
    }

    /// `POST /api/register`: create an account. The created-user payload is
    /// returned as-is; callers only care that it succeeded.
    ///
    /// # Errors
    ///
    /// `Rejected` when the server refuses the details (duplicate email, etc.).
    pub async fn register(&self, email: &str, username: &str, password: &str) -> Result<serde_json::Value, ApiError> {
        let payload = RegisterRequest { email, username, password };
        tracing::debug!(body = %redacted_body(&payload), "POST /api/register");
        let request = self.http.post(self.endpoint("/api/register")).json(&payload);
        send(request, Guard::Credentials).await
    }

    /// `GET /api/tasks`: the caller's task collection, optionally filtered
    /// server-side.
    ///
    /// # Errors
    ///
    /// `Unauthorized` on 401; `Malformed` if the envelope or any task fails
    /// to decode.
    pub async fn list_tasks(&self, token: &str, criteria: Option<&FilterCriteria>) -> Result<Vec<Task>, ApiError> {
        let mut request = self.http.get(self.endpoint("/api/tasks")).bearer_auth(token);
        if let Some(criteria) = criteria.filter(|c| !c.is_unfiltered()) {
            request = request.query(&[("filter", criteria.status.as_str()), ("search", criteria.search.trim())]);
        }
        let body: Envelope<TaskCollection> = send(request, Guard::Bearer).await?;
        Ok(body.data.tasks)
    }

    /// `POST /api/tasks`: persist a task; the server's copy is returned.
    ///
    /// # Errors
    ///
    /// `Unauthorized` on 401; `Status` on validation refusal.
    pub async fn create_task(&self, token: &str, task: &Task) -> Result<Task, ApiError> {
        let request = self
            .http
            .post(self.endpoint("/api/tasks"))
            .bearer_auth(token)
            .json(task);
        let body: Envelope<Task> = send(request, Guard::Bearer).await?;
        Ok(body.data)
    }

    /// `PUT /api/tasks/{id}`: partial update.
    ///
    /// # Errors
    ///
    /// `NotFound` if the server has no such task.
    pub async fn update_task(&self, token: &str, id: TaskId, patch: &TaskPatch) -> Result<Task, ApiError> {
        let request = self
            .http
            .put(self.endpoint(&format!("/api/tasks/{id}")))
            .bearer_auth(token)
            .json(patch);
        let body: Envelope<Task> = send(request, Guard::Bearer).await?;
        Ok(body.data)
    }

    /// `PATCH /api/tasks/{id}/toggle-complete`: server flips `completed`
    /// and returns the result.
    ///
    /// # Errors
    ///
    /// `NotFound` if the server has no such task.
    pub async fn toggle_task(&self, token: &str, id: TaskId) -> Result<Task, ApiError> {
        let request = self
            .http
            .patch(self.endpoint(&format!("/api/tasks/{id}/toggle-complete")))
            .bearer_auth(token);
        let body: Envelope<Task> = send(request, Guard::Bearer).await?;
        Ok(body.data)
    }

    /// `DELETE /api/tasks/{id}`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the server has no such task.
    pub async fn delete_task(&self, token: &str, id: TaskId) -> Result<(), ApiError> {
        let request = self
            .http
            .delete(self.endpoint(&format!("/api/tasks/{id}")))
            .bearer_auth(token);
        send_raw(request, Guard::Bearer).await.map(drop)
    }

    /// `GET /api/tasks/stats`: server-side counts.
    ///
    /// # Errors
    ///
    /// `Unauthorized` on 401.
    pub async fn task_stats(&self, token: &str) -> Result<TaskStats, ApiError> {
        let request = self.http.get(self.endpoint("/api/tasks/stats")).bearer_auth(token);
        let body: Envelope<TaskStats> = send(request, Guard::Bearer).await?;
        Ok(body.data)
    }
}

// =============================================================================
// RESPONSE HANDLING
// =============================================================================

async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder, guard: Guard) -> Result<T, ApiError> {
    let text = send_raw(request, guard).await?;
    decode(&text)
}

async fn send_raw(request: reqwest::RequestBuilder, guard: Guard) -> Result<String, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::from_transport(&e))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::from_transport(&e))?;

    if !status.is_success() {
        return Err(classify_status(status, &text, guard));
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::Malformed(e.to_string()))
}

fn classify_status(status: StatusCode, body: &str, guard: Guard) -> ApiError {
    match (guard, status) {
        (Guard::Credentials, s) if s.is_client_error() => ApiError::Rejected(error_detail(body, s)),
        (Guard::Bearer, StatusCode::UNAUTHORIZED) => ApiError::Unauthorized,
        (Guard::Bearer, StatusCode::NOT_FOUND) => ApiError::NotFound,
        (_, s) => ApiError::Status { status: s.as_u16(), body: body.to_owned() },
    }
}

/// Human-readable reason from a `{"detail": ...}` body, falling back to the
/// status line.
fn error_detail(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ErrorDetail>(body) {
        Ok(ErrorDetail { detail: serde_json::Value::String(text) }) => text,
        Ok(ErrorDetail { detail }) => detail.to_string(),
        Err(_) => status.to_string(),
    }
}

/// Request body for debug logs with secrets masked.
fn redacted_body<T: Serialize>(value: &T) -> String {
    let mut json = serde_json::to_value(value).unwrap_or_default();
    if let Some(obj) = json.as_object_mut() {
        for key in ["password", "access_token"] {
            if obj.contains_key(key) {
                obj.insert(key.to_owned(), serde_json::Value::String("***".into()));
            }
        }
    }
    json.to_string()
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

//! Wire and domain types shared by the API client and the task cache.
//!
//! DESIGN
//! ======
//! The API's task shape is loose: older endpoints omit category, progress,
//! subtasks, and owner entirely. Every optional field therefore has a serde
//! default, while the required core (`id`, `title`, `createdAt`) must be
//! present or the payload is rejected as malformed.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use time::{Date, OffsetDateTime};

use crate::util::timefmt;

pub type TaskId = i64;
pub type UserId = i64;

pub const DEFAULT_CATEGORY: &str = "personal";

// =============================================================================
// USERS
// =============================================================================

/// Profile returned by `GET /api/users/me`, persisted as `user_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub username: String,
    #[serde(with = "timefmt::timestamp")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}

/// `{"detail": "..."}` error body.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub detail: serde_json::Value,
}

/// `{"success": true, "data": ...}` wrapper used by the task endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskCollection {
    pub tasks: Vec<Task>,
}

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}' (expected high, medium, or low)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown recurrence '{other}' (expected daily, weekly, or monthly)")),
        }
    }
}

// =============================================================================
// TASKS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(with = "timefmt::date", default = "timefmt::today")]
    pub due_date: Date,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(with = "timefmt::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub recurring: Option<Recurrence>,
    #[serde(default, deserialize_with = "clamped_progress")]
    pub progress: u8,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default, rename = "notifyBefore", alias = "notifyBeforeMinutes", deserialize_with = "positive_minutes")]
    pub notify_before_minutes: Option<u32>,
    /// `None` only for payloads from endpoints that omit ownership; the task
    /// cache stamps the session user before storing them.
    #[serde(default, rename = "user_id", alias = "ownerUserId", skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<UserId>,
}

impl Task {
    /// `(done, total)` over subtasks. Display-only; never drives `completed`.
    #[must_use]
    pub fn subtask_summary(&self) -> (usize, usize) {
        let done = self.subtasks.iter().filter(|s| s.completed).count();
        (done, self.subtasks.len())
    }

    /// Apply a partial edit. `progress` is clamped and a zero notify window
    /// clears the reminder.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            self.tags.clone_from(tags);
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(category) = &patch.category {
            self.category.clone_from(category);
        }
        if let Some(recurring) = patch.recurring {
            self.recurring = recurring;
        }
        if let Some(progress) = patch.progress {
            self.progress = clamp_progress(i64::from(progress));
        }
        if let Some(minutes) = patch.notify_before_minutes {
            self.notify_before_minutes = minutes.filter(|m| *m > 0);
        }
    }
}

/// Partial update body for `PUT /api/tasks/{id}`. Absent fields are left
/// untouched; `recurring`/`notifyBefore` use a nested option so they can be
/// cleared explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, with = "optional_date", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub recurring: Option<Option<Recurrence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(
        default,
        rename = "notifyBefore",
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub notify_before_minutes: Option<Option<u32>>,
}

impl TaskPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn completed(completed: bool) -> Self {
        Self { completed: Some(completed), ..Self::default() }
    }
}

mod optional_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_str(&crate::util::timefmt::format_date(*date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| crate::util::timefmt::parse_date(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

#[must_use]
pub fn clamp_progress(raw: i64) -> u8 {
    u8::try_from(raw.clamp(0, 100)).unwrap_or(100)
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_owned()
}

fn clamped_progress<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    #[allow(clippy::cast_possible_truncation)]
    Ok(clamp_progress(raw.round() as i64))
}

fn positive_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|m| u32::try_from(m).ok()).filter(|m| *m > 0))
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field
/// (`None`, via `#[serde(default)]`).
#[allow(clippy::option_option)]
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

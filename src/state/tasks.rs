//! Per-user task cache with write-through sync.
//!
//! SYSTEM CONTEXT
//! ==============
//! Holds the signed-in user's working copy of their tasks. Reads come from a
//! single `GET /api/tasks`; local edits (`add`, `toggle`, `remove`, `edit`,
//! `toggle_subtask`) apply to the cache immediately and are pushed to the
//! server by the matching `sync_*` call.
//!
//! DESIGN
//! ======
//! - The cache belongs to one user. Whenever the session's user differs from
//!   the cache owner (logout, 401 teardown, account switch) the cache is
//!   dropped before anything is read from it.
//! - Tasks added locally carry negative ids until `sync_created` swaps in the
//!   server's id, so they never collide with server rows.
//! - `fetch_all` never fails for transport or shape problems: it logs and
//!   returns an empty list so the caller stays usable. Only 401 is surfaced,
//!   after the session has been torn down.
//! - A refresh replaces server rows only. Unsynced local adds survive it,
//!   after the server rows, so `sync_created` can still push them.
//! - Each local id has at most one `sync_created` in flight.
//!
//! The cache mutex is never held across an await.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use time::{Date, OffsetDateTime};

use crate::config::ClientConfig;
use crate::net::api::{ApiClient, ApiError};
use crate::net::types::{
    DEFAULT_CATEGORY, Priority, Recurrence, Subtask, Task, TaskId, TaskPatch, UserId, clamp_progress,
};
use crate::state::session::{Session, SessionManager};
use crate::util::filter::{self, FilterCriteria, TaskStats};
use crate::util::timefmt;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Validation(String),
    #[error("not signed in")]
    NotAuthenticated,
    #[error("session expired; sign in again")]
    SessionExpired,
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("task {0} is already being created")]
    CreateInFlight(TaskId),
    #[error(transparent)]
    Api(ApiError),
}

/// Outcome of the most recent `fetch_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loaded,
    /// The last fetch failed; only unsynced local adds remain cached.
    Degraded,
}

/// Whether `id` was assigned locally and has not reached the server yet.
#[must_use]
pub fn is_local_id(id: TaskId) -> bool {
    id < 0
}

// =============================================================================
// DRAFT
// =============================================================================

/// User-supplied fields for a new task. Everything but the title is optional.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub due_date: Option<Date>,
    pub category: Option<String>,
    pub recurring: Option<Recurrence>,
    pub progress: Option<i64>,
    pub subtasks: Vec<String>,
    pub notify_before_minutes: Option<u32>,
}

impl TaskDraft {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }

    fn build(self, id: TaskId, owner: UserId, now: OffsetDateTime) -> Result<Task, TaskError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(TaskError::Validation("title is required".into()));
        }
        if self.notify_before_minutes == Some(0) {
            return Err(TaskError::Validation("reminder must be a positive number of minutes".into()));
        }

        let mut subtasks = Vec::with_capacity(self.subtasks.len());
        for raw in &self.subtasks {
            let text = raw.trim();
            if text.is_empty() {
                return Err(TaskError::Validation("subtask title is required".into()));
            }
            subtasks.push(Subtask { id: uuid::Uuid::new_v4().to_string(), title: text.to_owned(), completed: false });
        }

        let category = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);

        Ok(Task {
            id,
            title: title.to_owned(),
            completed: false,
            priority: self.priority,
            tags: self
                .tags
                .iter()
                .map(String::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
            due_date: self.due_date.unwrap_or_else(timefmt::today),
            category: category.to_owned(),
            created_at: now,
            recurring: self.recurring,
            progress: clamp_progress(self.progress.unwrap_or(0)),
            subtasks,
            notify_before_minutes: self.notify_before_minutes,
            owner_user_id: Some(owner),
        })
    }
}

fn validate_patch(patch: &TaskPatch) -> Result<(), TaskError> {
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(TaskError::Validation("title is required".into()));
    }
    if patch.notify_before_minutes == Some(Some(0)) {
        return Err(TaskError::Validation("reminder must be a positive number of minutes".into()));
    }
    Ok(())
}

/// Every editable field of `task`, as sent by `sync_edited`.
fn full_patch(task: &Task) -> TaskPatch {
    TaskPatch {
        title: Some(task.title.clone()),
        completed: Some(task.completed),
        priority: Some(task.priority),
        tags: Some(task.tags.clone()),
        due_date: Some(task.due_date),
        category: Some(task.category.clone()),
        recurring: Some(task.recurring),
        progress: Some(task.progress),
        notify_before_minutes: Some(task.notify_before_minutes),
    }
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Debug)]
struct Cache {
    owner: Option<UserId>,
    tasks: Vec<Task>,
    load_state: LoadState,
    next_local_id: TaskId,
    last_add: Option<RecentAdd>,
    creating: HashSet<TaskId>,
}

#[derive(Debug)]
struct RecentAdd {
    title: String,
    id: TaskId,
    at: Instant,
}

impl Cache {
    fn for_owner(owner: Option<UserId>) -> Self {
        Self {
            owner,
            tasks: Vec::new(),
            load_state: LoadState::Idle,
            next_local_id: -1,
            last_add: None,
            creating: HashSet::new(),
        }
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Replace server rows with `server`, keeping unsynced local adds last.
    fn refresh(&mut self, mut server: Vec<Task>) {
        server.extend(self.tasks.drain(..).filter(|t| is_local_id(t.id)));
        self.tasks = server;
    }
}

/// Marks a local id as being created. Cleared on drop so a failed or
/// cancelled create can be retried.
struct Creating<'a> {
    client: &'a TaskListClient,
    id: TaskId,
}

impl Drop for Creating<'_> {
    fn drop(&mut self) {
        self.client.lock_cache().creating.remove(&self.id);
    }
}

/// Keep only `owner`'s tasks; stamp ownerless payloads with `owner`.
fn scope_to(tasks: Vec<Task>, owner: UserId) -> Vec<Task> {
    let received = tasks.len();
    let scoped: Vec<Task> = tasks
        .into_iter()
        .filter_map(|mut task| match task.owner_user_id {
            Some(id) if id != owner => None,
            _ => {
                task.owner_user_id = Some(owner);
                Some(task)
            }
        })
        .collect();
    if scoped.len() != received {
        tracing::warn!(dropped = received - scoped.len(), "server returned tasks owned by another user");
    }
    scoped
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct TaskListClient {
    session: Arc<SessionManager>,
    api: Arc<ApiClient>,
    fetch_timeout: Duration,
    add_debounce: Duration,
    cache: Mutex<Cache>,
}

impl TaskListClient {
    #[must_use]
    pub fn new(session: Arc<SessionManager>, config: &ClientConfig) -> Self {
        let api = Arc::clone(session.api());
        Self {
            session,
            api,
            fetch_timeout: config.fetch_timeout,
            add_debounce: config.add_debounce,
            cache: Mutex::new(Cache::for_owner(None)),
        }
    }

    fn require_session(&self) -> Result<Session, TaskError> {
        self.session.session().ok_or(TaskError::NotAuthenticated)
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache for the current user, reset if ownership changed.
    fn cache(&self) -> MutexGuard<'_, Cache> {
        let owner = self.session.session().map(|s| s.user_id);
        let mut cache = self.lock_cache();
        if cache.owner != owner {
            if cache.owner.is_some() {
                tracing::debug!("session changed; dropping cached tasks");
            }
            *cache = Cache::for_owner(owner);
        }
        cache
    }

    /// Map a sync failure, tearing the session down on 401.
    fn settle(&self, id: TaskId, err: ApiError) -> TaskError {
        match err {
            ApiError::Unauthorized => {
                self.expire();
                TaskError::SessionExpired
            }
            ApiError::NotFound => TaskError::NotFound(id),
            other => {
                tracing::warn!(task_id = id, error = %other, "task sync failed");
                TaskError::Api(other)
            }
        }
    }

    fn expire(&self) {
        self.session.handle_unauthorized();
        *self.lock_cache() = Cache::for_owner(None);
    }

    /// Whether `session` is still the active one after an await.
    fn still_current(&self, session: &Session) -> bool {
        self.session.session().is_some_and(|s| s.user_id == session.user_id)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Replace the cached server rows with the user's task collection and
    /// return the refreshed cache. Unsynced local adds are kept.
    ///
    /// Transport failures, timeouts, and malformed bodies are logged and
    /// yield an empty list with [`LoadState::Degraded`]; unsynced local adds
    /// still stay cached.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session; `SessionExpired` on 401, after
    /// the session has been signed out.
    pub async fn fetch_all(&self) -> Result<Vec<Task>, TaskError> {
        let session = self.require_session()?;
        let started = Instant::now();
        let result = tokio::time::timeout(self.fetch_timeout, self.api.list_tasks(&session.token, None))
            .await
            .unwrap_or(Err(ApiError::Timeout));

        if !self.still_current(&session) {
            return Err(TaskError::NotAuthenticated);
        }

        match result {
            Ok(tasks) => {
                let tasks = scope_to(tasks, session.user_id);
                tracing::debug!(count = tasks.len(), elapsed = ?started.elapsed(), "tasks loaded");
                let mut cache = self.cache();
                cache.refresh(tasks);
                cache.load_state = LoadState::Loaded;
                Ok(cache.tasks.clone())
            }
            Err(ApiError::Unauthorized) => {
                self.expire();
                Err(TaskError::SessionExpired)
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, "could not reach task service; showing an empty list");
                } else {
                    tracing::error!(error = %e, "task listing unusable; showing an empty list");
                }
                let mut cache = self.cache();
                cache.refresh(Vec::new());
                cache.load_state = LoadState::Degraded;
                Ok(Vec::new())
            }
        }
    }

    /// Server-side filtered listing. Does not touch the cache.
    ///
    /// # Errors
    ///
    /// `SessionExpired` on 401; other API failures are returned as-is.
    pub async fn fetch_matching(&self, criteria: &FilterCriteria) -> Result<Vec<Task>, TaskError> {
        let session = self.require_session()?;
        match self.api.list_tasks(&session.token, Some(criteria)).await {
            Ok(tasks) => Ok(scope_to(tasks, session.user_id)),
            Err(ApiError::Unauthorized) => {
                self.expire();
                Err(TaskError::SessionExpired)
            }
            Err(e) => Err(TaskError::Api(e)),
        }
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache().tasks.clone()
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.cache().tasks.iter().find(|t| t.id == id).cloned()
    }

    #[must_use]
    pub fn filtered(&self, criteria: &FilterCriteria) -> Vec<Task> {
        let cache = self.cache();
        filter::filter(&cache.tasks, criteria).into_iter().cloned().collect()
    }

    /// Counts derived from the cache.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(&self.cache().tasks)
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.cache().load_state
    }

    // -------------------------------------------------------------------------
    // Local mutations
    // -------------------------------------------------------------------------

    /// Validate `draft` and append it to the cache with a local id.
    ///
    /// Submitting the same title again within the debounce window returns
    /// the task already added instead of a second copy.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session; `Validation` for a blank title,
    /// blank subtask, or zero-minute reminder.
    pub fn add(&self, draft: TaskDraft) -> Result<Task, TaskError> {
        let session = self.require_session()?;
        let mut cache = self.cache();

        let title = draft.title.trim().to_owned();
        if let Some(recent) = &cache.last_add {
            if recent.title == title && recent.at.elapsed() < self.add_debounce {
                if let Some(existing) = cache.tasks.iter().find(|t| t.id == recent.id) {
                    tracing::debug!(task_id = existing.id, "duplicate add suppressed");
                    return Ok(existing.clone());
                }
            }
        }

        let id = cache.next_local_id;
        let task = draft.build(id, session.user_id, OffsetDateTime::now_utc())?;
        cache.next_local_id -= 1;
        cache.tasks.push(task.clone());
        cache.last_add = Some(RecentAdd { title, id, at: Instant::now() });
        Ok(task)
    }

    /// Flip `completed`. Returns the new value, or `None` if no such task.
    pub fn toggle(&self, id: TaskId) -> Option<bool> {
        let mut cache = self.cache();
        let task = cache.get_mut(id)?;
        task.completed = !task.completed;
        Some(task.completed)
    }

    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut cache = self.cache();
        let idx = cache.position(id)?;
        Some(cache.tasks.remove(idx))
    }

    /// Apply `patch` to the cached task.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank title or zero-minute reminder; `NotFound` if
    /// the task is not cached.
    pub fn edit(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, TaskError> {
        validate_patch(patch)?;
        let mut cache = self.cache();
        let task = cache.get_mut(id).ok_or(TaskError::NotFound(id))?;
        task.apply(patch);
        Ok(task.clone())
    }

    /// Flip one subtask. The parent's `completed` flag is left alone.
    pub fn toggle_subtask(&self, task_id: TaskId, subtask_id: &str) -> Option<bool> {
        let mut cache = self.cache();
        let subtask = cache
            .get_mut(task_id)?
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)?;
        subtask.completed = !subtask.completed;
        Some(subtask.completed)
    }

    // -------------------------------------------------------------------------
    // Write-through
    // -------------------------------------------------------------------------

    /// Put the server's copy of `id` in the cache, keeping ownership.
    fn store_server_copy(&self, id: TaskId, mut server: Task, owner: UserId) -> Task {
        server.owner_user_id = Some(owner);
        let mut cache = self.cache();
        if let Some(slot) = cache.get_mut(id) {
            slot.clone_from(&server);
        }
        server
    }

    fn cached(&self, id: TaskId) -> Result<Task, TaskError> {
        self.get(id).ok_or(TaskError::NotFound(id))
    }

    /// Persist a locally added task. The cached entry keeps its local edits
    /// and adopts the server's id and creation time. Already-synced tasks
    /// are returned unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is not cached; `CreateInFlight` while another
    /// create for `id` is pending; `SessionExpired` on 401. On any other
    /// failure the local entry is kept and the error returned.
    pub async fn sync_created(&self, id: TaskId) -> Result<Task, TaskError> {
        let session = self.require_session()?;
        let (local, _creating) = {
            let mut cache = self.cache();
            let local = cache
                .tasks
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .ok_or(TaskError::NotFound(id))?;
            if !is_local_id(id) {
                return Ok(local);
            }
            if !cache.creating.insert(id) {
                return Err(TaskError::CreateInFlight(id));
            }
            (local, Creating { client: self, id })
        };

        let server = self
            .api
            .create_task(&session.token, &local)
            .await
            .map_err(|e| self.settle(id, e))?;
        if !self.still_current(&session) {
            return Err(TaskError::NotAuthenticated);
        }

        let mut cache = self.cache();
        let Some(slot) = cache.get_mut(id) else {
            tracing::warn!(task_id = server.id, "task removed locally while it was being created");
            return Ok(server);
        };
        slot.id = server.id;
        slot.created_at = server.created_at;
        slot.owner_user_id = Some(session.user_id);
        let reconciled = slot.clone();
        if let Some(recent) = cache.last_add.as_mut().filter(|r| r.id == id) {
            recent.id = server.id;
        }
        tracing::info!(local_id = id, task_id = server.id, "task created");
        Ok(reconciled)
    }

    /// Push the cached `completed` flag for `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task is unknown locally or on the server;
    /// `SessionExpired` on 401.
    pub async fn sync_toggled(&self, id: TaskId) -> Result<Task, TaskError> {
        let task = self.cached(id)?;
        self.push_patch(id, &TaskPatch::completed(task.completed)).await
    }

    /// Push every editable field of the cached task.
    ///
    /// # Errors
    ///
    /// Same as [`Self::sync_toggled`].
    pub async fn sync_edited(&self, id: TaskId) -> Result<Task, TaskError> {
        let task = self.cached(id)?;
        self.push_patch(id, &full_patch(&task)).await
    }

    async fn push_patch(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, TaskError> {
        if is_local_id(id) {
            return self.sync_created(id).await;
        }
        let session = self.require_session()?;
        let server = self
            .api
            .update_task(&session.token, id, patch)
            .await
            .map_err(|e| self.settle(id, e))?;
        Ok(self.store_server_copy(id, server, session.user_id))
    }

    /// Ask the server to flip `completed` and cache its answer.
    ///
    /// # Errors
    ///
    /// `NotFound` if the server has no such task; `SessionExpired` on 401.
    pub async fn toggle_remote(&self, id: TaskId) -> Result<Task, TaskError> {
        let session = self.require_session()?;
        let server = self
            .api
            .toggle_task(&session.token, id)
            .await
            .map_err(|e| self.settle(id, e))?;
        Ok(self.store_server_copy(id, server, session.user_id))
    }

    /// Delete a task already removed from the cache. Local-only tasks and
    /// tasks the server no longer has are treated as deleted.
    ///
    /// # Errors
    ///
    /// `SessionExpired` on 401; other API failures.
    pub async fn sync_removed(&self, task: &Task) -> Result<(), TaskError> {
        if is_local_id(task.id) {
            return Ok(());
        }
        let session = self.require_session()?;
        match self.api.delete_task(&session.token, task.id).await {
            Ok(()) | Err(ApiError::NotFound) => Ok(()),
            Err(e) => Err(self.settle(task.id, e)),
        }
    }

    /// Counts computed by the server.
    ///
    /// # Errors
    ///
    /// `SessionExpired` on 401; other API failures.
    pub async fn remote_stats(&self) -> Result<TaskStats, TaskError> {
        let session = self.require_session()?;
        self.api.task_stats(&session.token).await.map_err(|e| match e {
            ApiError::Unauthorized => {
                self.expire();
                TaskError::SessionExpired
            }
            other => TaskError::Api(other),
        })
    }
}

#[cfg(test)]
#[path = "tasks_test.rs"]
mod tasks_test;

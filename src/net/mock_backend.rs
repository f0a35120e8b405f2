//! In-process stand-in for the DreamFlow API used by client tests.
//!
//! Binds an Axum router to `127.0.0.1:0` and exposes its state so tests can
//! seed data and inject failures (profile errors, expired tokens, slow or
//! malformed task listings).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::{date, datetime};

use crate::config::ClientConfig;
use crate::net::types::{Priority, Recurrence, Subtask, Task, TaskPatch};
use crate::util::filter::{self, FilterCriteria, TaskStats};

pub const ALICE_ID: i64 = 1;
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "wonderland";
pub const BOB_ID: i64 = 2;

/// Timestamp the mock reports for every account, in the naive shape the
/// real backend emits.
pub const PROFILE_CREATED_AT: &str = "2024-01-29T10:30:00";

#[derive(Debug, Clone)]
pub struct MockUser {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub users: Vec<MockUser>,
    pub tokens: HashMap<String, i64>,
    pub tasks: Vec<Task>,
    pub next_task_id: i64,
    pub issued: u64,
    /// `GET /api/users/me` answers 500.
    pub fail_profile: bool,
    /// Every bearer-protected call answers 401.
    pub expire_tokens: bool,
    /// Sleep before answering `GET /api/tasks`.
    pub list_delay: Option<Duration>,
    /// Raw body for `GET /api/tasks`, bypassing serialization.
    pub list_body_override: Option<String>,
    pub list_status_override: Option<u16>,
    /// Return other users' tasks too.
    pub include_foreign: bool,
    /// Omit `user_id` from listed tasks, like the legacy endpoint.
    pub strip_owner: bool,
    pub login_calls: usize,
}

impl MockState {
    fn seeded() -> Self {
        let users = vec![
            MockUser {
                id: ALICE_ID,
                email: ALICE_EMAIL.into(),
                username: "alice".into(),
                password: ALICE_PASSWORD.into(),
            },
            MockUser { id: BOB_ID, email: "bob@example.com".into(), username: "bob".into(), password: "builder".into() },
        ];
        let tasks = vec![
            seed_task(1, "Design new landing page", false, Priority::High, "work", ALICE_ID),
            Task {
                recurring: Some(Recurrence::Daily),
                progress: 100,
                ..seed_task(2, "Morning meditation", true, Priority::Medium, "personal", ALICE_ID)
            },
            seed_task(3, "Grocery shopping", false, Priority::Low, "errands", ALICE_ID),
            seed_task(4, "Bob's errand", false, Priority::High, "errands", BOB_ID),
        ];
        Self { users, tasks, next_task_id: 100, ..Self::default() }
    }

    fn bearer_user(&self, headers: &HeaderMap) -> Result<i64, Response> {
        let unauthorized = || detail(StatusCode::UNAUTHORIZED, "Could not validate credentials");
        if self.expire_tokens {
            return Err(unauthorized());
        }
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;
        self.tokens.get(token).copied().ok_or_else(unauthorized)
    }

    fn owned_index(&self, user_id: i64, id: i64) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id && t.owner_user_id == Some(user_id))
    }
}

fn seed_task(id: i64, title: &str, completed: bool, priority: Priority, category: &str, owner: i64) -> Task {
    Task {
        id,
        title: title.into(),
        completed,
        priority,
        tags: BTreeSet::from([category.to_owned()]),
        due_date: date!(2024 - 02 - 15),
        category: category.into(),
        created_at: datetime!(2024-01-29 10:30:00 UTC),
        recurring: None,
        progress: 0,
        subtasks: vec![Subtask { id: format!("{id}-1"), title: "first step".into(), completed: false }],
        notify_before_minutes: None,
        owner_user_id: Some(owner),
    }
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

// =============================================================================
// HANDLE
// =============================================================================

pub struct MockBackend {
    pub base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::seeded()));
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock backend should bind");
        let addr = listener.local_addr().expect("mock backend should have an address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock backend should serve");
        });
        Self { base_url: format!("http://{addr}"), state, handle }
    }

    /// Config pointed at this backend with short timeouts and no debounce.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_base_url(&self.base_url)
            .expect("mock base url should be valid");
        config.timeouts.request_secs = 5;
        config.fetch_timeout = Duration::from_secs(2);
        config.add_debounce = Duration::ZERO;
        config
    }

    /// Inspect or mutate backend state.
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut lock(&self.state))
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Config for a port nothing listens on.
pub fn unreachable_config() -> ClientConfig {
    let mut config = ClientConfig::default()
        .with_base_url("http://127.0.0.1:9")
        .expect("static url should be valid");
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 2;
    config
}

// =============================================================================
// ROUTES
// =============================================================================

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/register", post(register))
        .route("/api/users/me", get(me))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/stats", get(stats))
        .route("/api/tasks/{id}", put(update_task).delete(delete_task))
        .route("/api/tasks/{id}/toggle-complete", patch(toggle_task))
        .with_state(state)
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn login(State(state): State<Shared>, Json(body): Json<Credentials>) -> Response {
    let mut s = lock(&state);
    s.login_calls += 1;
    let Some(user_id) = s
        .users
        .iter()
        .find(|u| u.email == body.email && u.password == body.password)
        .map(|u| u.id)
    else {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    };
    s.issued += 1;
    let token = format!("tok-{user_id}-{}", s.issued);
    s.tokens.insert(token.clone(), user_id);
    Json(json!({ "access_token": token, "token_type": "bearer" })).into_response()
}

fn profile_json(user: &MockUser) -> serde_json::Value {
    json!({
        "id": user.id,
        "email": user.email,
        "username": user.username,
        "created_at": PROFILE_CREATED_AT,
    })
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if s.fail_profile {
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "profile lookup failed");
    }
    match s.users.iter().find(|u| u.id == user_id) {
        Some(user) => Json(profile_json(user)).into_response(),
        None => detail(StatusCode::NOT_FOUND, "User not found"),
    }
}

#[derive(Deserialize)]
struct Registration {
    email: String,
    username: String,
    password: String,
}

async fn register(State(state): State<Shared>, Json(body): Json<Registration>) -> Response {
    let mut s = lock(&state);
    if body.email.is_empty() || body.username.is_empty() || body.password.is_empty() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "All fields are required");
    }
    if s.users.iter().any(|u| u.email == body.email) {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    let id = s.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
    let user = MockUser { id, email: body.email, username: body.username, password: body.password };
    let payload = profile_json(&user);
    s.users.push(user);
    Json(payload).into_response()
}

#[derive(Deserialize, Default)]
struct ListQuery {
    filter: Option<String>,
    search: Option<String>,
}

async fn list_tasks(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<ListQuery>) -> Response {
    let delay = lock(&state).list_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Some(code) = s.list_status_override {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return detail(status, "injected failure");
    }
    if let Some(body) = &s.list_body_override {
        return (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body.clone()).into_response();
    }

    let criteria = FilterCriteria::new(
        query
            .filter
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default(),
        query.search.unwrap_or_default(),
    );
    let visible: Vec<Task> = s
        .tasks
        .iter()
        .filter(|t| s.include_foreign || t.owner_user_id == Some(user_id))
        .cloned()
        .collect();
    let mut tasks: Vec<Task> = filter::filter(&visible, &criteria).into_iter().cloned().collect();
    if s.strip_owner {
        for task in &mut tasks {
            task.owner_user_id = None;
        }
    }
    let total = tasks.len();
    Json(json!({ "success": true, "data": { "tasks": tasks, "total": total, "page": 1, "limit": total } }))
        .into_response()
}

async fn create_task(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    let mut s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.get("title").and_then(|t| t.as_str()).is_none_or(|t| t.trim().is_empty()) {
        return detail(StatusCode::BAD_REQUEST, "Title is required");
    }
    let mut task: Task = match serde_json::from_value(body) {
        Ok(task) => task,
        Err(e) => return detail(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };
    task.id = s.next_task_id;
    s.next_task_id += 1;
    task.created_at = OffsetDateTime::now_utc();
    task.owner_user_id = Some(user_id);
    s.tasks.push(task.clone());
    Json(json!({ "success": true, "data": task, "message": "Task created successfully" })).into_response()
}

async fn update_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Response {
    let mut s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(idx) = s.owned_index(user_id, id) else {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    };
    s.tasks[idx].apply(&patch);
    let task = s.tasks[idx].clone();
    Json(json!({ "success": true, "data": task, "message": "Task updated successfully" })).into_response()
}

async fn toggle_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    let mut s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(idx) = s.owned_index(user_id, id) else {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    };
    s.tasks[idx].completed = !s.tasks[idx].completed;
    let task = s.tasks[idx].clone();
    Json(json!({ "success": true, "data": task })).into_response()
}

async fn delete_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    let mut s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(idx) = s.owned_index(user_id, id) else {
        return detail(StatusCode::NOT_FOUND, "Task not found");
    };
    let task = s.tasks.remove(idx);
    Json(json!({ "success": true, "data": task, "message": "Task deleted successfully" })).into_response()
}

async fn stats(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let s = lock(&state);
    let user_id = match s.bearer_user(&headers) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let owned: Vec<Task> = s
        .tasks
        .iter()
        .filter(|t| t.owner_user_id == Some(user_id))
        .cloned()
        .collect();
    Json(json!({ "success": true, "data": TaskStats::from_tasks(&owned) })).into_response()
}

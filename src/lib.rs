//! DreamFlow task client.
//!
//! SYSTEM CONTEXT
//! ==============
//! The remote DreamFlow API owns accounts and task persistence. This crate
//! owns the client half: the authenticated session (acquired, persisted,
//! restored, torn down) and a per-user task cache with filtering and
//! write-through sync. The `dreamflow` binary is a thin CLI front end over
//! the same types.
//!
//! Control flow: [`state::session::SessionManager`] restores first, gates the
//! task surface through [`util::guard`], and hands its bearer token to
//! [`state::tasks::TaskListClient`] on every request.

pub mod config;
pub mod net;
pub mod state;
pub mod util;

pub use config::ClientConfig;
pub use net::api::{ApiClient, ApiError};
pub use net::types::{Priority, Recurrence, Subtask, Task, TaskPatch, UserProfile};
pub use state::session::{AuthPhase, AuthState, Session, SessionError, SessionManager};
pub use state::tasks::{LoadState, TaskDraft, TaskError, TaskListClient};
pub use util::filter::{FilterCriteria, StatusFilter, TaskStats};
pub use util::storage::{FileStore, KeyValueStore, MemoryStore, StoreError};

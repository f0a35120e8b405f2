use std::sync::{Mutex, MutexGuard, PoisonError};

use super::*;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that mutate process env.
fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Safety
/// Callers must hold `env_lock()`.
unsafe fn clear_dreamflow_env() {
    unsafe {
        std::env::remove_var("DREAMFLOW_BASE_URL");
        std::env::remove_var("DREAMFLOW_STATE_DIR");
        std::env::remove_var("DREAMFLOW_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("DREAMFLOW_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("DREAMFLOW_FETCH_TIMEOUT_SECS");
        std::env::remove_var("DREAMFLOW_ADD_DEBOUNCE_MS");
    }
}

#[test]
fn from_env_uses_defaults() {
    let _env = env_lock();
    unsafe { clear_dreamflow_env() };

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg, ClientConfig::default());
    assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    assert_eq!(cfg.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));
}

#[test]
fn from_env_parses_overrides() {
    let _env = env_lock();
    unsafe {
        clear_dreamflow_env();
        std::env::set_var("DREAMFLOW_BASE_URL", "https://todo.example.test/");
        std::env::set_var("DREAMFLOW_STATE_DIR", "/tmp/df-state");
        std::env::set_var("DREAMFLOW_REQUEST_TIMEOUT_SECS", "30");
        std::env::set_var("DREAMFLOW_CONNECT_TIMEOUT_SECS", "3");
        std::env::set_var("DREAMFLOW_FETCH_TIMEOUT_SECS", "2");
        std::env::set_var("DREAMFLOW_ADD_DEBOUNCE_MS", "0");
    }

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, "https://todo.example.test");
    assert_eq!(cfg.state_dir, PathBuf::from("/tmp/df-state"));
    assert_eq!(cfg.timeouts, HttpTimeouts { request_secs: 30, connect_secs: 3 });
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(2));
    assert_eq!(cfg.add_debounce, Duration::ZERO);

    unsafe { clear_dreamflow_env() };
}

#[test]
fn from_env_unparseable_numbers_fall_back() {
    let _env = env_lock();
    unsafe {
        clear_dreamflow_env();
        std::env::set_var("DREAMFLOW_FETCH_TIMEOUT_SECS", "soon");
        std::env::set_var("DREAMFLOW_REQUEST_TIMEOUT_SECS", "-4");
    }

    let cfg = ClientConfig::from_env().unwrap();
    assert_eq!(cfg.fetch_timeout, Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);

    unsafe { clear_dreamflow_env() };
}

#[test]
fn from_env_rejects_schemeless_base_url() {
    let _env = env_lock();
    unsafe {
        clear_dreamflow_env();
        std::env::set_var("DREAMFLOW_BASE_URL", "todo.example.test");
    }

    let err = ClientConfig::from_env().unwrap_err();
    assert_eq!(err, ConfigError::InvalidBaseUrl("todo.example.test".into()));
    assert!(err.to_string().contains("http://"));

    unsafe { clear_dreamflow_env() };
}

#[test]
fn normalize_base_url_trims_slashes_and_whitespace() {
    assert_eq!(normalize_base_url("  http://localhost:8000//  ").unwrap(), "http://localhost:8000");
}

#[test]
fn normalize_base_url_requires_host() {
    assert!(normalize_base_url("https://").is_err());
    assert!(normalize_base_url("ftp://files.example.test").is_err());
}

#[test]
fn with_base_url_overrides_and_validates() {
    let cfg = ClientConfig::default().with_base_url("http://10.0.0.5:9000/").unwrap();
    assert_eq!(cfg.base_url, "http://10.0.0.5:9000");
    assert!(ClientConfig::default().with_base_url("nope").is_err());
}

#[test]
fn with_state_dir_replaces_directory() {
    let cfg = ClientConfig::default().with_state_dir("/var/lib/dreamflow");
    assert_eq!(cfg.state_dir, PathBuf::from("/var/lib/dreamflow"));
}

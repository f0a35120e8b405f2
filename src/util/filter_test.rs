use std::collections::BTreeSet;

use time::macros::{date, datetime};

use super::*;

fn task(id: i64, title: &str, completed: bool, priority: Priority) -> Task {
    Task {
        id,
        title: title.into(),
        completed,
        priority,
        tags: BTreeSet::new(),
        due_date: date!(2024 - 02 - 15),
        category: "work".into(),
        created_at: datetime!(2024-01-29 10:30:00 UTC),
        recurring: None,
        progress: 0,
        subtasks: Vec::new(),
        notify_before_minutes: None,
        owner_user_id: Some(1),
    }
}

fn seed() -> Vec<Task> {
    vec![
        task(1, "Design new landing page", false, Priority::High),
        task(2, "Morning meditation", true, Priority::Medium),
        task(3, "Grocery shopping", false, Priority::Low),
        task(4, "Pay rent", true, Priority::High),
    ]
}

fn ids(tasks: &[&Task]) -> Vec<i64> {
    tasks.iter().map(|t| t.id).collect()
}

// =============================================================================
// filter
// =============================================================================

#[test]
fn completed_filter_keeps_completed_in_order() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::Completed, ""));
    assert_eq!(ids(&out), vec![2, 4]);
    assert!(out.iter().all(|t| t.completed));
}

#[test]
fn active_filter_keeps_incomplete() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::Active, ""));
    assert_eq!(ids(&out), vec![1, 3]);
}

#[test]
fn all_with_empty_search_returns_everything() {
    let tasks = seed();
    let criteria = FilterCriteria::default();
    assert!(criteria.is_unfiltered());
    assert_eq!(ids(&filter(&tasks, &criteria)), vec![1, 2, 3, 4]);
}

#[test]
fn search_is_case_insensitive() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::All, "MEDITATION"));
    assert_eq!(ids(&out), vec![2]);
}

#[test]
fn plural_search_matches_singular_title() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::All, "GROCERIES"));
    assert_eq!(ids(&out), vec![3]);
}

#[test]
fn plain_plural_search_matches() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::All, "pages"));
    assert_eq!(ids(&out), vec![1]);
}

#[test]
fn search_and_status_combine() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::Completed, "pa"));
    assert_eq!(ids(&out), vec![4]);
}

#[test]
fn search_with_no_match_is_empty() {
    let tasks = seed();
    assert!(filter(&tasks, &FilterCriteria::new(StatusFilter::All, "taxes")).is_empty());
}

#[test]
fn search_is_trimmed() {
    let tasks = seed();
    let out = filter(&tasks, &FilterCriteria::new(StatusFilter::All, "  rent "));
    assert_eq!(ids(&out), vec![4]);
}

#[test]
fn filter_is_idempotent_and_pure() {
    let tasks = seed();
    let before = tasks.clone();
    let criteria = FilterCriteria::new(StatusFilter::Active, "g");

    let once: Vec<Task> = filter(&tasks, &criteria).into_iter().cloned().collect();
    let twice: Vec<Task> = filter(&once, &criteria).into_iter().cloned().collect();

    assert_eq!(once, twice);
    assert_eq!(tasks, before);
}

#[test]
fn singularize_rules() {
    assert_eq!(singularize("groceries").as_deref(), Some("grocery"));
    assert_eq!(singularize("tasks").as_deref(), Some("task"));
    assert_eq!(singularize("class"), None);
    assert_eq!(singularize("s"), None);
    assert_eq!(singularize("milk"), None);
}

#[test]
fn status_filter_parses() {
    assert_eq!("Completed".parse::<StatusFilter>().unwrap(), StatusFilter::Completed);
    assert!("done".parse::<StatusFilter>().is_err());
    assert_eq!(StatusFilter::Active.to_string(), "active");
}

// =============================================================================
// stats
// =============================================================================

#[test]
fn stats_three_tasks_one_completed() {
    let tasks = vec![
        task(1, "a", false, Priority::High),
        task(2, "b", true, Priority::Medium),
        task(3, "c", false, Priority::Low),
    ];
    let stats = TaskStats::from_tasks(&tasks);
    assert_eq!((stats.total, stats.completed, stats.active), (3, 1, 2));
    assert_eq!(stats.by_priority, PriorityCounts { high: 1, medium: 1, low: 1 });
}

#[test]
fn stats_empty() {
    assert_eq!(TaskStats::from_tasks(&[]), TaskStats::default());
}

#[test]
fn stats_deserialize_server_shape() {
    let json = r#"{"total": 3, "completed": 1, "active": 2, "byPriority": {"high": 1, "medium": 1, "low": 1}}"#;
    let stats: TaskStats = serde_json::from_str(json).unwrap();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.by_priority.low, 1);
}

//! Pure task filtering and derived statistics.
//!
//! SYSTEM CONTEXT
//! ==============
//! The task list surface renders `filter(cache, criteria)` and `TaskStats`
//! on every change. Neither stores anything: stats are recomputed from the
//! current cache so they can never drift from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::net::types::{Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown status filter '{other}' (expected all, active, or completed)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub status: StatusFilter,
    pub search: String,
}

impl FilterCriteria {
    #[must_use]
    pub fn new(status: StatusFilter, search: impl Into<String>) -> Self {
        Self { status, search: search.into() }
    }

    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.status == StatusFilter::All && self.search.trim().is_empty()
    }
}

/// Tasks matching `criteria`, in their original order.
#[must_use]
pub fn filter<'a>(tasks: &'a [Task], criteria: &FilterCriteria) -> Vec<&'a Task> {
    let needle = SearchNeedle::new(&criteria.search);
    tasks
        .iter()
        .filter(|task| criteria.status.matches(task) && needle.matches(&task.title))
        .collect()
}

/// Lowercased search term plus its singular form. A title matches if it
/// contains either, so "GROCERIES" finds "Grocery shopping".
struct SearchNeedle {
    term: String,
    singular: Option<String>,
}

impl SearchNeedle {
    fn new(raw: &str) -> Self {
        let term = raw.trim().to_lowercase();
        let singular = singularize(&term);
        Self { term, singular }
    }

    fn matches(&self, title: &str) -> bool {
        if self.term.is_empty() {
            return true;
        }
        let title = title.to_lowercase();
        title.contains(&self.term) || self.singular.as_ref().is_some_and(|s| title.contains(s.as_str()))
    }
}

fn singularize(term: &str) -> Option<String> {
    if let Some(stem) = term.strip_suffix("ies") {
        if !stem.is_empty() {
            return Some(format!("{stem}y"));
        }
    }
    if term.ends_with("ss") {
        return None;
    }
    term.strip_suffix('s')
        .filter(|stem| !stem.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// STATS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    #[serde(default)]
    pub by_priority: PriorityCounts,
}

impl TaskStats {
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self { total: tasks.len(), ..Self::default() };
        for task in tasks {
            if task.completed {
                stats.completed += 1;
            }
            match task.priority {
                Priority::High => stats.by_priority.high += 1,
                Priority::Medium => stats.by_priority.medium += 1,
                Priority::Low => stats.by_priority.low += 1,
            }
        }
        stats.active = stats.total - stats.completed;
        stats
    }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod tests;

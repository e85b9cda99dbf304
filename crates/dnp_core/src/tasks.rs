use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use dnp_proto::clock::to_datetime;
use dnp_proto::RecordKind;

use crate::error::CoreError;
use crate::notes::COPY_SUFFIX;
use crate::records::{Item, RecordBody, RecordManager};

pub const DEFAULT_TASK_TITLE: &str = "New Task";

/// Declaration order is sort order: high first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(CoreError::InvalidInput(format!("unknown priority: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskBody {
    pub title: String,
    pub description: String,
    pub due: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub completed: bool,
    /// Set when `completed` flips on, cleared when it flips off.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for TaskBody {
    fn default() -> Self {
        Self {
            title: DEFAULT_TASK_TITLE.to_string(),
            description: String::new(),
            due: None,
            priority: Priority::default(),
            completed: false,
            completed_at: None,
        }
    }
}

impl TaskBody {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due.is_some_and(|due| due < now)
    }

    /// Pending and due on the same UTC calendar day as `now`.
    pub fn is_due_today(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due.is_some_and(|due| due.date_naive() == now.date_naive())
    }

    /// Pending and due in `[now, now + window]`.
    pub fn is_due_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        !self.completed && self.due.is_some_and(|due| due >= now && due <= now + window)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `Some(None)` clears the due date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl RecordBody for TaskBody {
    const KIND: RecordKind = RecordKind::Task;

    fn normalize(&mut self, now_ms: i64) {
        let title = self.title.trim();
        self.title = if title.is_empty() {
            DEFAULT_TASK_TITLE.to_string()
        } else {
            title.to_string()
        };
        if !self.completed {
            self.completed_at = None;
        } else if self.completed_at.is_none() {
            self.completed_at = to_datetime(now_ms);
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }

    fn duplicate(&self) -> Self {
        Self {
            title: format!("{}{COPY_SUFFIX}", self.title),
            description: self.description.clone(),
            due: self.due,
            priority: self.priority,
            completed: false,
            completed_at: None,
        }
    }

    /// Pending before completed, then priority, then earliest due date
    /// (undated last), then most recently edited.
    fn compare(a: &Item<Self>, b: &Item<Self>) -> Ordering {
        a.body
            .completed
            .cmp(&b.body.completed)
            .then_with(|| a.body.priority.cmp(&b.body.priority))
            .then_with(|| match (a.body.due, b.body.due) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| b.modified_at.cmp(&a.modified_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

pub type TaskManager = RecordManager<TaskBody>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub overdue: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Whole percent.
    pub completion_rate: u32,
}

impl RecordManager<TaskBody> {
    pub async fn toggle(&self, id: &str) -> Result<Item<TaskBody>, CoreError> {
        self.modify(id, |body| {
            body.completed = !body.completed;
            Ok(())
        })
        .await
    }

    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<Item<TaskBody>, CoreError> {
        self.update(
            id,
            &TaskPatch {
                completed: Some(completed),
                ..TaskPatch::default()
            },
        )
        .await
    }

    pub fn pending(&self) -> Vec<Item<TaskBody>> {
        self.filter(|t| !t.body.completed)
    }

    pub fn completed(&self) -> Vec<Item<TaskBody>> {
        self.filter(|t| t.body.completed)
    }

    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<Item<TaskBody>> {
        self.filter(|t| t.body.is_overdue(now))
    }

    pub fn due_today(&self, now: DateTime<Utc>) -> Vec<Item<TaskBody>> {
        self.filter(|t| t.body.is_due_today(now))
    }

    /// Pending tasks coming due in the next `window`, e.g. `Duration::days(7)`.
    pub fn due_within(&self, now: DateTime<Utc>, window: Duration) -> Vec<Item<TaskBody>> {
        self.filter(|t| t.body.is_due_within(now, window))
    }

    pub fn by_priority(&self, priority: Priority) -> Vec<Item<TaskBody>> {
        self.filter(|t| t.body.priority == priority)
    }

    /// Delete every completed task. Returns how many were removed.
    pub async fn clear_completed(&self) -> Result<usize, CoreError> {
        self.delete_where(|t| t.body.completed).await
    }

    pub fn stats(&self, now: DateTime<Utc>) -> TaskStats {
        let tasks = self.list();
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.body.completed).count();
        let count = |p: Priority| tasks.iter().filter(|t| t.body.priority == p).count();
        let completion_rate = if total == 0 {
            0
        } else {
            (completed as f64 * 100.0 / total as f64).round() as u32
        };
        TaskStats {
            total,
            completed,
            pending: total - completed,
            overdue: tasks.iter().filter(|t| t.body.is_overdue(now)).count(),
            high: count(Priority::High),
            medium: count(Priority::Medium),
            low: count(Priority::Low),
            completion_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, modified_at: i64, body: TaskBody) -> Item<TaskBody> {
        Item {
            id: id.into(),
            created_at: 0,
            modified_at,
            body,
        }
    }

    #[test]
    fn normalize_tracks_completion_time() {
        let mut body = TaskBody::new("x");
        body.completed = true;
        body.normalize(1_700_000_000_000);
        let stamped = body.completed_at.unwrap();
        assert_eq!(stamped.timestamp_millis(), 1_700_000_000_000);

        body.normalize(1_700_000_999_000);
        assert_eq!(body.completed_at, Some(stamped));

        body.completed = false;
        body.normalize(1_700_001_000_000);
        assert!(body.completed_at.is_none());
    }

    #[test]
    fn overdue_needs_pending_and_past_due() {
        let now = Utc::now();
        let mut body = TaskBody::new("x");
        assert!(!body.is_overdue(now));
        body.due = Some(now - Duration::hours(1));
        assert!(body.is_overdue(now));
        body.completed = true;
        assert!(!body.is_overdue(now));
    }

    #[test]
    fn due_today_uses_the_utc_calendar_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let mut body = TaskBody::new("x");
        assert!(!body.is_due_today(now));
        body.due = Some(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap());
        assert!(body.is_due_today(now));
        body.due = Some(Utc.with_ymd_and_hms(2024, 5, 10, 23, 59, 0).unwrap());
        assert!(body.is_due_today(now));
        body.due = Some(Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap());
        assert!(!body.is_due_today(now));
        body.due = Some(now);
        body.completed = true;
        assert!(!body.is_due_today(now));
    }

    #[test]
    fn due_within_is_an_inclusive_forward_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let week = Duration::days(7);
        let mut body = TaskBody::new("x");
        assert!(!body.is_due_within(now, week));
        for (due, expected) in [
            (now - Duration::minutes(1), false),
            (now, true),
            (now + Duration::days(3), true),
            (now + week, true),
            (now + week + Duration::seconds(1), false),
        ] {
            body.due = Some(due);
            assert_eq!(body.is_due_within(now, week), expected, "{due}");
        }
        body.due = Some(now + Duration::days(1));
        body.completed = true;
        assert!(!body.is_due_within(now, week));
    }

    #[test]
    fn listing_order() {
        let now = Utc::now();
        let done = TaskBody {
            completed: true,
            priority: Priority::High,
            ..TaskBody::new("done")
        };
        let low = TaskBody {
            priority: Priority::Low,
            ..TaskBody::new("low")
        };
        let high_late = TaskBody {
            priority: Priority::High,
            due: Some(now + Duration::days(2)),
            ..TaskBody::new("high late")
        };
        let high_soon = TaskBody {
            priority: Priority::High,
            due: Some(now + Duration::days(1)),
            ..TaskBody::new("high soon")
        };
        let high_undated = TaskBody {
            priority: Priority::High,
            ..TaskBody::new("high undated")
        };

        let mut items = vec![
            item("a", 5, done),
            item("b", 4, low),
            item("c", 3, high_undated),
            item("d", 2, high_late),
            item("e", 1, high_soon),
        ];
        items.sort_by(TaskBody::compare);
        let order: Vec<&str> = items.iter().map(|i| i.body.title.as_str()).collect();
        assert_eq!(order, vec!["high soon", "high late", "high undated", "low", "done"]);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
        let body: TaskBody = serde_json::from_str(r#"{"priority":"low"}"#).unwrap();
        assert_eq!(body.priority, Priority::Low);
        assert_eq!(body.title, DEFAULT_TASK_TITLE);
    }

    #[test]
    fn patch_can_clear_due_date() {
        let patch = TaskPatch {
            due: Some(None),
            ..TaskPatch::default()
        };
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"due":null}"#);
    }
}

//! Core data models for taskcal.
//!
//! These types are shared by every taskcal crate and represent the stored
//! entities plus the summaries that enrichment attaches to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new time-ordered (v7) identifier for a row.
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

// =============================================================================
// TASK TYPES
// =============================================================================

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Three-state task progress. `Done` is held exactly when the task is completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Work out the `(completed, status)` pair after applying an optional
    /// completion flag and an optional status to the current values.
    ///
    /// A status wins over the current completion flag; a completion flag alone
    /// moves the status to `Done`, or back to `NotStarted` when un-completing a
    /// done task. Supplying both in contradiction is rejected.
    pub fn resolve(
        requested_completed: Option<bool>,
        requested_status: Option<TaskStatus>,
        current_completed: bool,
        current_status: TaskStatus,
    ) -> std::result::Result<(bool, TaskStatus), String> {
        match (requested_completed, requested_status) {
            (Some(completed), Some(status)) => {
                if completed != (status == TaskStatus::Done) {
                    return Err(format!(
                        "Status '{}' contradicts completed={}",
                        status, completed
                    ));
                }
                Ok((completed, status))
            }
            (None, Some(status)) => Ok((status == TaskStatus::Done, status)),
            (Some(true), None) => Ok((true, TaskStatus::Done)),
            (Some(false), None) => {
                let status = if current_status == TaskStatus::Done {
                    TaskStatus::NotStarted
                } else {
                    current_status
                };
                Ok((false, status))
            }
            (None, None) => Ok((current_completed, current_status)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// A task with its enrichment (list summary, attachments, tag links).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub task_list_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_list: Option<TaskListSummary>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: Vec<TaskTag>,
}

impl Task {
    /// Overdue: scheduled strictly before `now` and not completed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.scheduled_date.is_some_and(|d| d < now)
    }
}

/// Minimal task view attached to attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    pub task_list_id: Uuid,
}

/// A tag as linked to a task, carrying the per-link display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTag {
    pub tag_id: Uuid,
    pub name: String,
    pub tag_type: TagType,
    pub color: Option<String>,
    pub value: Option<String>,
    pub display_text: Option<String>,
    pub icon_name: Option<String>,
}

// =============================================================================
// TASK LIST TYPES
// =============================================================================

/// A named, colored list that owns tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskList {
    pub fn summary(&self) -> TaskListSummary {
        TaskListSummary {
            id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// List view attached to enriched tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListSummary {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

// =============================================================================
// CALENDAR TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
    pub is_visible: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Calendar view attached to enriched events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSummary {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub is_visible: bool,
}

// =============================================================================
// EVENT TYPES
// =============================================================================

/// A calendar event. Recurring events are a single master row whose rule is
/// stored verbatim and never expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub user_id: String,
    pub calendar_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub all_day: bool,
    pub recurrence_rule: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarSummary>,
}

/// One overlap between a candidate interval and an existing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConflict {
    pub event: Event,
    pub overlap_start: DateTime<Utc>,
    pub overlap_end: DateTime<Utc>,
    pub overlap_minutes: i64,
}

// =============================================================================
// TAG TYPES
// =============================================================================

/// Fixed set of tag kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    #[default]
    Label,
    Category,
    Priority,
    Status,
    Person,
    Location,
    Custom,
}

impl TagType {
    pub const ALL: [TagType; 7] = [
        TagType::Label,
        TagType::Category,
        TagType::Priority,
        TagType::Status,
        TagType::Person,
        TagType::Location,
        TagType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Category => "category",
            Self::Priority => "priority",
            Self::Status => "status",
            Self::Person => "person",
            Self::Location => "location",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TagType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        TagType::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| format!("Invalid tag type: {}", s))
    }
}

/// A global (not user-scoped) tag with its current link count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub tag_type: TagType,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub usage_count: i64,
}

/// Outcome of removing unlinked tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagCleanupResult {
    pub removed_count: usize,
    pub removed_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTypeCount {
    pub tag_type: TagType,
    pub count: i64,
}

/// Aggregate tag usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagStatistics {
    pub total_tags: i64,
    pub by_type: Vec<TagTypeCount>,
    /// Most linked tags, descending by usage count.
    pub most_used: Vec<Tag>,
}

// =============================================================================
// ATTACHMENT TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSummary>,
}

/// Usage for one top-level MIME category ("image", "application", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeCategoryUsage {
    pub category: String,
    pub file_count: i64,
    pub total_bytes: i64,
}

/// Per-user attachment storage summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: i64,
    pub total_bytes: i64,
    pub largest_file_bytes: i64,
    pub by_category: Vec<MimeCategoryUsage>,
}

//! Core traits for taskcal data access.
//!
//! [`EntityService`] is the CRUD contract every entity shares; each entity adds
//! its own extension trait on top. Request, update and filter types live next
//! to the trait that consumes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::context::AuthContext;
use crate::error::Result;
use crate::models::*;

/// Deserialize a field present-as-null into `Some(None)`, so partial updates
/// can tell "clear this field" apart from "leave it alone".
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Sort direction accepted by list filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Invalid sort order: {}", s)),
        }
    }
}

// =============================================================================
// GENERIC ENTITY CONTRACT
// =============================================================================

/// Authorization-scoped CRUD shared by every entity.
///
/// - `find_all` restricts to the caller's rows when the entity is user-owned.
/// - `find_by_id` looks up by primary key only and does **not** check ownership.
/// - `update` and `delete` run an ownership probe first and fail with an
///   authorization error when the row is missing or owned by someone else.
#[async_trait]
pub trait EntityService: Send + Sync {
    type Entity: Send;
    type Create: Send;
    type Update: Send;
    type Filter: Send;

    async fn find_all(&self, filter: Self::Filter, ctx: &AuthContext) -> Result<Vec<Self::Entity>>;

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Self::Entity>>;

    async fn create(&self, data: Self::Create, ctx: &AuthContext) -> Result<Self::Entity>;

    async fn update(
        &self,
        id: Uuid,
        data: Self::Update,
        ctx: &AuthContext,
    ) -> Result<Option<Self::Entity>>;

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool>;
}

// =============================================================================
// TASKS
// =============================================================================

/// Tag to link while creating or re-tagging a task. The tag is found by
/// normalized name or created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagLinkInput {
    pub name: String,
    #[serde(default)]
    pub tag_type: Option<TagType>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub icon_name: Option<String>,
}

/// Per-link fields when attaching an existing tag to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTagLinkData {
    pub value: Option<String>,
    pub display_text: Option<String>,
    pub icon_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Falls back to the user's default list.
    #[serde(default)]
    pub task_list_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub scheduled_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<TagLinkInput>,
}

/// Partial task update; absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub task_list_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_date: Option<Option<DateTime<Utc>>>,
    /// Replaces the task's tag links when present.
    #[serde(default)]
    pub tags: Option<Vec<TagLinkInput>>,
}

/// Fields a bulk update may change on every selected task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkTaskUpdate {
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub task_list_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_date: Option<Option<DateTime<Utc>>>,
}

impl BulkTaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.completed.is_none()
            && self.priority.is_none()
            && self.task_list_id.is_none()
            && self.scheduled_date.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_list_id: Option<Uuid>,
    /// Inclusive lower bound on `scheduled_date`.
    pub scheduled_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `scheduled_date`.
    pub scheduled_to: Option<DateTime<Utc>>,
    /// Case-insensitive substring over title and description.
    pub search: Option<String>,
    /// Tasks linked to at least one of these tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// One of: created_at, updated_at, scheduled_date, priority, title
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[async_trait]
pub trait TaskService:
    EntityService<
    Entity = Task,
    Create = CreateTaskRequest,
    Update = UpdateTaskRequest,
    Filter = TaskFilter,
>
{
    /// Flip completion; sets `completed_at` when completing, clears it otherwise.
    async fn toggle_completion(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Task>>;

    /// Incomplete tasks scheduled before now, earliest first.
    async fn find_overdue(&self, ctx: &AuthContext) -> Result<Vec<Task>>;

    /// Apply one patch to every id, or to none of them.
    async fn bulk_update(
        &self,
        ids: &[Uuid],
        data: BulkTaskUpdate,
        ctx: &AuthContext,
    ) -> Result<Vec<Task>>;

    /// Delete every id, or none of them. Returns the number of rows removed.
    async fn bulk_delete(&self, ids: &[Uuid], ctx: &AuthContext) -> Result<u64>;

    /// Link an existing tag to a task, or refresh the link's display fields.
    async fn attach_tag(
        &self,
        task_id: Uuid,
        tag_id: Uuid,
        link: TaskTagLinkData,
        ctx: &AuthContext,
    ) -> Result<Option<Task>>;

    /// Remove a tag link. Returns whether a link existed.
    async fn detach_tag(&self, task_id: Uuid, tag_id: Uuid, ctx: &AuthContext) -> Result<bool>;
}

// =============================================================================
// TASK LISTS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskListRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskListRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListFilter {
    pub search: Option<String>,
}

#[async_trait]
pub trait TaskListService:
    EntityService<
    Entity = TaskList,
    Create = CreateTaskListRequest,
    Update = UpdateTaskListRequest,
    Filter = TaskListFilter,
>
{
    /// The user's "General" list, created on first use.
    async fn get_or_create_default(&self, ctx: &AuthContext) -> Result<TaskList>;
}

// =============================================================================
// CALENDARS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCalendarRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    /// Forced to true for a user's first calendar.
    #[serde(default)]
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCalendarRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    /// `Some(true)` moves the default here; `Some(false)` on the current
    /// default is rejected.
    #[serde(default)]
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarFilter {
    pub is_visible: Option<bool>,
    pub search: Option<String>,
}

#[async_trait]
pub trait CalendarService:
    EntityService<
    Entity = Calendar,
    Create = CreateCalendarRequest,
    Update = UpdateCalendarRequest,
    Filter = CalendarFilter,
>
{
    /// The user's default calendar, created on first use.
    async fn get_default(&self, ctx: &AuthContext) -> Result<Calendar>;
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    /// Falls back to the user's default calendar.
    #[serde(default)]
    pub calendar_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub recurrence_rule: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEventRequest {
    #[serde(default)]
    pub calendar_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub recurrence_rule: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub calendar_id: Option<Uuid>,
    pub all_day: Option<bool>,
    /// Inclusive lower bound on `start_time`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `start_time`.
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring over title, description and location.
    pub search: Option<String>,
    /// One of: start_time, end_time, title, created_at
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Candidate interval for conflict detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictQuery {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Event being edited, excluded from its own conflicts.
    #[serde(default)]
    pub exclude_event_id: Option<Uuid>,
    #[serde(default)]
    pub calendar_id: Option<Uuid>,
}

#[async_trait]
pub trait EventService:
    EntityService<
    Entity = Event,
    Create = CreateEventRequest,
    Update = UpdateEventRequest,
    Filter = EventFilter,
>
{
    /// Every event of the caller overlapping the candidate interval.
    async fn get_conflicts(
        &self,
        query: ConflictQuery,
        ctx: &AuthContext,
    ) -> Result<Vec<EventConflict>>;
}

// =============================================================================
// TAGS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    #[serde(default)]
    pub tag_type: Option<TagType>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTagRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag_type: Option<TagType>,
    #[serde(default, deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag_type: Option<TagType>,
    pub search: Option<String>,
}

#[async_trait]
pub trait TagService:
    EntityService<
    Entity = Tag,
    Create = CreateTagRequest,
    Update = UpdateTagRequest,
    Filter = TagFilter,
>
{
    /// Case-insensitive lookup by name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Existing tag with the normalized name, or a new one.
    async fn find_or_create(&self, data: CreateTagRequest, ctx: &AuthContext) -> Result<Tag>;

    /// Repoint every link from `source_ids` to `target_id` and delete the sources.
    async fn merge(&self, source_ids: &[Uuid], target_id: Uuid, ctx: &AuthContext) -> Result<Tag>;

    /// Delete every tag with no task links.
    async fn cleanup_unused(&self, ctx: &AuthContext) -> Result<TagCleanupResult>;

    async fn get_statistics(&self, top_n: Option<i64>) -> Result<TagStatistics>;
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAttachmentRequest {
    pub task_id: Uuid,
    pub filename: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAttachmentRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentFilter {
    pub task_id: Option<Uuid>,
    /// Exact MIME type match.
    pub file_type: Option<String>,
    /// Case-insensitive substring over the filename.
    pub search: Option<String>,
}

#[async_trait]
pub trait AttachmentService:
    EntityService<
    Entity = Attachment,
    Create = CreateAttachmentRequest,
    Update = UpdateAttachmentRequest,
    Filter = AttachmentFilter,
>
{
    async fn get_storage_stats(&self, ctx: &AuthContext) -> Result<StorageStats>;
}

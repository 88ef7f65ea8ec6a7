//! Centralized default constants for taskcal.
//!
//! **This module is the single source of truth** for shared limits and default
//! values. Repositories and validators reference these instead of defining
//! their own magic numbers.

// =============================================================================
// BATCHING
// =============================================================================

/// Maximum number of ids accepted by a bulk update or bulk delete.
pub const BULK_LIMIT: usize = 100;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for list queries.
pub const PAGE_LIMIT: i64 = 50;

/// Hard upper bound on a requested page size.
pub const PAGE_LIMIT_MAX: i64 = 500;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// TASK LISTS
// =============================================================================

/// Name of the fallback list every user owns.
pub const DEFAULT_TASK_LIST_NAME: &str = "General";

/// Color given to lists created without one.
pub const DEFAULT_TASK_LIST_COLOR: &str = "#3B82F6";

/// Icon given to lists created without one.
pub const DEFAULT_TASK_LIST_ICON: &str = "list";

// =============================================================================
// CALENDARS
// =============================================================================

/// Name of the calendar created on demand when a user has none.
pub const DEFAULT_CALENDAR_NAME: &str = "Personal";

/// Color given to calendars created without one.
pub const DEFAULT_CALENDAR_COLOR: &str = "#10B981";

// =============================================================================
// NAMES
// =============================================================================

pub const TASK_TITLE_MAX_LEN: usize = 255;
pub const TASK_LIST_NAME_MAX_LEN: usize = 100;
pub const CALENDAR_NAME_MAX_LEN: usize = 100;
pub const EVENT_TITLE_MAX_LEN: usize = 255;
pub const TAG_NAME_MAX_LEN: usize = 50;
pub const FILENAME_MAX_LEN: usize = 255;

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Maximum number of attachments on one task.
pub const MAX_ATTACHMENTS_PER_TASK: i64 = 10;

/// Maximum size of a single attachment (10 MiB).
pub const MAX_ATTACHMENT_BYTES: i64 = 10 * 1024 * 1024;

// =============================================================================
// TAGS
// =============================================================================

/// Number of tags returned in the "most used" statistics section.
pub const TAG_STATS_TOP_N: i64 = 10;

//! Structured logging schema and field names for taskcal.
//!
//! Repositories log through `tracing` with these field names so log queries
//! work the same across every entity.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Rejected ownership probes, cache anomalies |
//! | INFO  | Lifecycle events (pool, migrations), cascading writes (list delete, tag merge) |
//! | DEBUG | Mutations and their row counts |
//! | TRACE | Reads, cache hits and misses |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation id from the authorization context.
pub const REQUEST_ID: &str = "request_id";

/// Owner from the authorization context.
pub const USER_ID: &str = "user_id";

/// Subsystem originating the event. Values: "db", "cache", "migrate"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem, usually the table name.
pub const COMPONENT: &str = "component";

/// Logical operation name ("create", "bulk_update", "merge", ...).
pub const OPERATION: &str = "op";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a read.
pub const RESULT_COUNT: &str = "result_count";

/// Number of rows touched by a mutation.
pub const ROWS_AFFECTED: &str = "rows_affected";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

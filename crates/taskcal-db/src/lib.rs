//! # taskcal-db
//!
//! PostgreSQL data-access layer for taskcal.
//!
//! This crate provides:
//! - Connection pool management
//! - One repository per entity, each implementing `EntityService` and its
//!   extension trait
//! - Predicate building with positional parameters and sort allow-lists
//! - Batched relation enrichment
//! - The per-user task list cache shared by the task and task list repositories
//! - Versioned schema migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use taskcal_db::{AuthContext, CreateTaskRequest, Database, EntityService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/taskcal").await?;
//!     let ctx = AuthContext::for_user("user-1");
//!
//!     let task = db.tasks.create(CreateTaskRequest {
//!         title: "Write report".to_string(),
//!         ..Default::default()
//!     }, &ctx).await?;
//!
//!     println!("Created task {} in {:?}", task.id, task.task_list);
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod cache;
pub mod calendars;
pub mod enrich;
pub mod entity;
pub mod events;
pub mod filter;
pub mod pool;
pub mod tags;
pub mod task_lists;
pub mod tasks;

// Always compiled so integration tests (in tests/) can use it.
pub mod test_fixtures;

// Re-export core types
pub use taskcal_core::*;

pub use attachments::PgAttachmentRepository;
pub use cache::{CacheStats, TaskListCache};
pub use calendars::PgCalendarRepository;
pub use entity::{validate_batch, EntityTable};
pub use events::PgEventRepository;
pub use filter::{order_by, page, PredicateBuilder, QueryParam, UpdateSet};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use tags::PgTagRepository;
pub use task_lists::PgTaskListRepository;
pub use tasks::PgTaskRepository;

/// Every repository over one shared pool and one shared task list cache.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Task list repository.
    pub task_lists: PgTaskListRepository,
    /// Task repository (bulk operations, tag links).
    pub tasks: PgTaskRepository,
    /// Calendar repository.
    pub calendars: PgCalendarRepository,
    /// Event repository (conflict detection).
    pub events: PgEventRepository,
    /// Global tag repository (merge, cleanup, statistics).
    pub tags: PgTagRepository,
    /// Attachment repository.
    pub attachments: PgAttachmentRepository,
    /// Cache injected into the task and task list repositories.
    pub cache: TaskListCache,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    ///
    /// The task list cache is created here, once, and handed to both
    /// repositories that read or write task lists.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        let cache = TaskListCache::new();
        Self {
            task_lists: PgTaskListRepository::new(pool.clone(), cache.clone()),
            tasks: PgTaskRepository::new(pool.clone(), cache.clone()),
            calendars: PgCalendarRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            attachments: PgAttachmentRepository::new(pool.clone()),
            cache,
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        migrate_pool(&self.pool).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

/// Apply the embedded migrations to `pool`.
pub async fn migrate_pool(pool: &sqlx::Pool<sqlx::Postgres>) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
    Ok(())
}

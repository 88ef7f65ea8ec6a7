//! Task list repository implementation.
//!
//! Every mutation evicts the owner's entry in the shared [`TaskListCache`].
//! Deleting a list reassigns its tasks first, inside the same transaction, and
//! the last remaining list of a user can never be deleted.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use taskcal_core::defaults::{
    DEFAULT_TASK_LIST_COLOR, DEFAULT_TASK_LIST_ICON, DEFAULT_TASK_LIST_NAME,
    TASK_LIST_NAME_MAX_LEN,
};
use taskcal_core::validation::{require_name, validate_hex_color};
use taskcal_core::{
    new_v7, AuthContext, CreateTaskListRequest, EntityService, Error, Result, TaskList,
    TaskListFilter, TaskListService, UpdateTaskListRequest,
};

use crate::cache::TaskListCache;
use crate::entity::{ensure_owner, log_mutation, log_read, map_unique_violation, EntityTable};
use crate::filter::{bind_params, PredicateBuilder, UpdateSet};

const ICON_MAX_LEN: usize = 50;

const TASK_LIST_COLUMNS: &str =
    "l.id, l.user_id, l.name, l.color, l.icon, l.description, l.created_at, l.updated_at";

/// PostgreSQL implementation of TaskListService.
pub struct PgTaskListRepository {
    pool: Pool<Postgres>,
    cache: TaskListCache,
}

impl PgTaskListRepository {
    /// Create a repository sharing `cache` with the task repository.
    pub fn new(pool: Pool<Postgres>, cache: TaskListCache) -> Self {
        Self { pool, cache }
    }

    pub fn cache(&self) -> &TaskListCache {
        &self.cache
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<TaskList>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM task_list l WHERE l.id = $1",
            TASK_LIST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(map_task_list_row))
    }

    async fn name_taken(&self, user_id: &str, name: &str, excluding: Option<Uuid>) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM task_list
                WHERE user_id = $1 AND LOWER(name) = LOWER($2)
                  AND ($3::uuid IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }
}

pub(crate) fn map_task_list_row(r: &PgRow) -> TaskList {
    TaskList {
        id: r.get("id"),
        user_id: r.get("user_id"),
        name: r.get("name"),
        color: r.get("color"),
        icon: r.get("icon"),
        description: r.get("description"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

/// Every list of a user, ordered by name. Loader behind the cache.
pub(crate) async fn fetch_user_lists(pool: &Pool<Postgres>, user_id: &str) -> Result<Vec<TaskList>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM task_list l WHERE l.user_id = $1 ORDER BY l.name, l.id",
        TASK_LIST_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;
    Ok(rows.iter().map(map_task_list_row).collect())
}

/// Id of the user's "General" list, creating it when missing. The flag is
/// true when a row was inserted, so the caller knows to invalidate the cache.
pub(crate) async fn ensure_default_list(
    conn: &mut PgConnection,
    user_id: &str,
) -> Result<(Uuid, bool)> {
    let now = Utc::now();
    let inserted = sqlx::query(
        r#"
        INSERT INTO task_list (id, user_id, name, color, icon, description, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, NULL, $6, $6)
        ON CONFLICT (user_id, (LOWER(name))) DO NOTHING
        "#,
    )
    .bind(new_v7())
    .bind(user_id)
    .bind(DEFAULT_TASK_LIST_NAME)
    .bind(DEFAULT_TASK_LIST_COLOR)
    .bind(DEFAULT_TASK_LIST_ICON)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?
    .rows_affected();

    let id: Uuid = sqlx::query_scalar(
        "SELECT id FROM task_list WHERE user_id = $1 AND LOWER(name) = LOWER($2)",
    )
    .bind(user_id)
    .bind(DEFAULT_TASK_LIST_NAME)
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;

    Ok((id, inserted > 0))
}

impl EntityTable for PgTaskListRepository {
    type Filter = TaskListFilter;

    const ENTITY: &'static str = "task_list";
    const OWNER_PROBE: Option<&'static str> = Some("SELECT user_id FROM task_list WHERE id = $1");

    fn predicate(filter: &TaskListFilter, ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::owned_by("l.user_id", &ctx.user_id);
        p.search(&["l.name", "l.description"], filter.search.as_deref());
        p
    }
}

#[async_trait]
impl EntityService for PgTaskListRepository {
    type Entity = TaskList;
    type Create = CreateTaskListRequest;
    type Update = UpdateTaskListRequest;
    type Filter = TaskListFilter;

    async fn find_all(&self, filter: TaskListFilter, ctx: &AuthContext) -> Result<Vec<TaskList>> {
        let predicate = Self::predicate(&filter, ctx);
        let sql = format!(
            "SELECT {} FROM task_list l WHERE {} ORDER BY l.name ASC, l.id",
            TASK_LIST_COLUMNS,
            predicate.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let lists: Vec<TaskList> = rows.iter().map(map_task_list_row).collect();
        log_read(Self::ENTITY, "find_all", ctx, lists.len());
        Ok(lists)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<TaskList>> {
        let list = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(list.is_some()));
        Ok(list)
    }

    async fn create(&self, data: CreateTaskListRequest, ctx: &AuthContext) -> Result<TaskList> {
        let name = require_name("name", &data.name, TASK_LIST_NAME_MAX_LEN)?;
        let color = data
            .color
            .unwrap_or_else(|| DEFAULT_TASK_LIST_COLOR.to_string());
        validate_hex_color("color", &color)?;
        let icon = match data.icon {
            Some(icon) => require_name("icon", &icon, ICON_MAX_LEN)?,
            None => DEFAULT_TASK_LIST_ICON.to_string(),
        };
        let duplicate = format!("A task list named '{}' already exists", name);
        if self.name_taken(&ctx.user_id, &name, None).await? {
            return Err(Error::invalid_field("name", duplicate));
        }

        let id = new_v7();
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO task_list AS l (id, user_id, name, color, icon, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING l.id, l.user_id, l.name, l.color, l.icon, l.description, l.created_at, l.updated_at
            "#,
        )
        .bind(id)
        .bind(&ctx.user_id)
        .bind(&name)
        .bind(&color)
        .bind(&icon)
        .bind(data.description.map(|d| d.trim().to_string()))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, duplicate))?;

        self.cache.invalidate(&ctx.user_id).await;
        log_mutation(Self::ENTITY, "create", ctx, 1);
        Ok(map_task_list_row(&row))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateTaskListRequest,
        ctx: &AuthContext,
    ) -> Result<Option<TaskList>> {
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let mut set = UpdateSet::touching("updated_at", Utc::now());
        let mut duplicate = "A task list with this name already exists".to_string();
        if let Some(name) = &data.name {
            let name = require_name("name", name, TASK_LIST_NAME_MAX_LEN)?;
            duplicate = format!("A task list named '{}' already exists", name);
            if self.name_taken(&ctx.user_id, &name, Some(id)).await? {
                return Err(Error::invalid_field("name", duplicate));
            }
            set.set("name", name);
        }
        if let Some(color) = data.color {
            validate_hex_color("color", &color)?;
            set.set("color", color);
        }
        if let Some(icon) = &data.icon {
            set.set("icon", require_name("icon", icon, ICON_MAX_LEN)?);
        }
        if let Some(description) = data.description {
            set.set("description", description.map(|d| d.trim().to_string()));
        }

        let id_param = set.bind_where(id);
        let owner_param = set.bind_where(ctx.user_id.as_str());
        let sql = format!(
            "UPDATE task_list SET {} WHERE id = {} AND user_id = {}",
            set.assignments_sql(),
            id_param,
            owner_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, duplicate))?
            .rows_affected();

        self.cache.invalidate(&ctx.user_id).await;
        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;

        // Lock the user's lists so the count and fallback stay valid until commit.
        let lists = sqlx::query(
            r#"
            SELECT id, name FROM task_list
            WHERE user_id = $1
            ORDER BY created_at, id
            FOR UPDATE
            "#,
        )
        .bind(&ctx.user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if lists.len() <= 1 {
            return Err(Error::validation("Cannot delete the only task list"));
        }

        let others: Vec<(Uuid, String)> = lists
            .iter()
            .map(|r| (r.get::<Uuid, _>("id"), r.get::<String, _>("name")))
            .filter(|(other, _)| *other != id)
            .collect();
        let is_default_name = |name: &str| name.eq_ignore_ascii_case(DEFAULT_TASK_LIST_NAME);
        let deleting_default = lists
            .iter()
            .any(|r| r.get::<Uuid, _>("id") == id && is_default_name(&r.get::<String, _>("name")));

        let fallback = if deleting_default {
            // `others` is non-empty here and already oldest first.
            others[0].0
        } else if let Some((general, _)) = others.iter().find(|(_, name)| is_default_name(name)) {
            *general
        } else {
            ensure_default_list(&mut *tx, &ctx.user_id).await?.0
        };

        let moved = sqlx::query(
            "UPDATE task SET task_list_id = $1, updated_at = $2 WHERE task_list_id = $3 AND user_id = $4",
        )
        .bind(fallback)
        .bind(Utc::now())
        .bind(id)
        .bind(&ctx.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM task_list WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(&ctx.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        tx.commit().await.map_err(Error::Database)?;
        self.cache.invalidate(&ctx.user_id).await;

        info!(
            subsystem = "db",
            component = Self::ENTITY,
            op = "delete",
            request_id = %ctx.request_id,
            user_id = %ctx.user_id,
            task_list_id = %id,
            fallback_id = %fallback,
            tasks_reassigned = moved,
            "Task list deleted, tasks reassigned"
        );
        Ok(deleted > 0)
    }
}

#[async_trait]
impl TaskListService for PgTaskListRepository {
    async fn get_or_create_default(&self, ctx: &AuthContext) -> Result<TaskList> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let (id, created) = ensure_default_list(&mut *conn, &ctx.user_id).await?;
        drop(conn);

        if created {
            self.cache.invalidate(&ctx.user_id).await;
            log_mutation(Self::ENTITY, "create_default", ctx, 1);
        }
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Default task list {} vanished", id)))
    }
}

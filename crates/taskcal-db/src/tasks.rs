//! Task repository implementation.
//!
//! Tasks are the only entity with every kind of enrichment: the list summary
//! (served from the shared [`TaskListCache`]), attachments, and tag links. The
//! batched operations live here too: `bulk_update` and `bulk_delete` verify
//! ownership of the whole batch with one count query before touching any row.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use uuid::Uuid;

use taskcal_core::defaults::TASK_TITLE_MAX_LEN;
use taskcal_core::validation::{normalize_tag_name, require_name, validate_tag_name};
use taskcal_core::{
    new_v7, AuthContext, BulkTaskUpdate, CreateTaskRequest, EntityService, Error, Result,
    SortOrder, TagLinkInput, Task, TaskFilter, TaskService, TaskStatus, TaskTagLinkData,
    UpdateTaskRequest,
};

use crate::cache::TaskListCache;
use crate::enrich::{self, distinct};
use crate::entity::{
    ensure_owner, ensure_owns_all, log_mutation, log_read, parse_column, validate_batch,
    EntityTable,
};
use crate::filter::{bind_params, order_by, page, PredicateBuilder, UpdateSet};
use crate::tags::find_or_create_tag;
use crate::task_lists::{ensure_default_list, PgTaskListRepository};

const TASK_COLUMNS: &str = "t.id, t.user_id, t.task_list_id, t.title, t.description, \
     t.completed, t.completed_at, t.status, t.priority, t.scheduled_date, t.created_at, t.updated_at";

/// Allowed sort keys and the SQL they map to.
const TASK_SORTS: &[(&str, &str)] = &[
    ("created_at", "t.created_at"),
    ("updated_at", "t.updated_at"),
    ("scheduled_date", "t.scheduled_date"),
    (
        "priority",
        "CASE t.priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END",
    ),
    ("title", "LOWER(t.title)"),
];

const OWNED_COUNT_SQL: &str = "SELECT COUNT(*) FROM task WHERE id = ANY($1) AND user_id = $2";

/// PostgreSQL implementation of TaskService.
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
    cache: TaskListCache,
}

impl PgTaskRepository {
    /// Create a repository sharing `cache` with the task list repository.
    pub fn new(pool: Pool<Postgres>, cache: TaskListCache) -> Self {
        Self { pool, cache }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM task t WHERE t.id = $1", TASK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let task = map_task_row(&row)?;
        let owner = task.user_id.clone();
        Ok(self.enrich(vec![task], &owner).await?.pop())
    }

    /// Re-read a batch of the caller's tasks, newest first.
    async fn fetch_many(&self, ids: &[Uuid], ctx: &AuthContext) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task t WHERE t.user_id = $1 AND t.id = ANY($2) \
             ORDER BY t.created_at DESC, t.id",
            TASK_COLUMNS
        ))
        .bind(&ctx.user_id)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let tasks = rows.iter().map(map_task_row).collect::<Result<Vec<_>>>()?;
        self.enrich(tasks, &ctx.user_id).await
    }

    /// Attach list summaries, attachments and tag links with one query per
    /// related table. `owner` is the user the tasks belong to.
    async fn enrich(&self, mut tasks: Vec<Task>, owner: &str) -> Result<Vec<Task>> {
        if tasks.is_empty() {
            return Ok(tasks);
        }
        let task_ids = distinct(tasks.iter().map(|t| t.id));
        let list_ids = distinct(tasks.iter().map(|t| t.task_list_id));

        let lists = enrich::task_list_summaries(&self.pool, &self.cache, owner, &list_ids).await?;
        let mut attachments = enrich::attachments_by_task(&self.pool, owner, &task_ids).await?;
        let mut tags = enrich::tag_links_by_task(&self.pool, owner, &task_ids).await?;

        for task in &mut tasks {
            task.task_list = lists.get(&task.task_list_id).cloned();
            task.attachments = attachments.remove(&task.id).unwrap_or_default();
            task.tags = tags.remove(&task.id).unwrap_or_default();
        }
        Ok(tasks)
    }

    /// Current `(completed, status)` of a task, row-locked until commit.
    async fn lock_completion(conn: &mut PgConnection, id: Uuid) -> Result<(bool, TaskStatus)> {
        let row = sqlx::query("SELECT completed, status FROM task WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(conn)
            .await
            .map_err(Error::Database)?;
        Ok((row.get("completed"), parse_column(&row, "status")?))
    }
}

pub(crate) fn map_task_row(r: &PgRow) -> Result<Task> {
    Ok(Task {
        id: r.get("id"),
        user_id: r.get("user_id"),
        task_list_id: r.get("task_list_id"),
        title: r.get("title"),
        description: r.get("description"),
        completed: r.get("completed"),
        completed_at: r.get("completed_at"),
        status: parse_column(r, "status")?,
        priority: parse_column(r, "priority")?,
        scheduled_date: r.get("scheduled_date"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        task_list: None,
        attachments: Vec::new(),
        tags: Vec::new(),
    })
}

/// Validate tag link inputs, normalizing names and keeping the first of any
/// duplicates.
fn prepare_tag_links(links: Vec<TagLinkInput>) -> Result<Vec<(String, TagLinkInput)>> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(links.len());
    for link in links {
        let name = validate_tag_name(&link.name)?;
        if seen.insert(name.clone()) {
            prepared.push((name, link));
        }
    }
    Ok(prepared)
}

/// Find or create each tag and link it to the task.
async fn link_tags(
    conn: &mut PgConnection,
    task_id: Uuid,
    links: Vec<(String, TagLinkInput)>,
) -> Result<()> {
    for (name, link) in links {
        let tag_id = find_or_create_tag(&mut *conn, &name, link.tag_type.unwrap_or_default(), None)
            .await?;
        upsert_link(
            &mut *conn,
            task_id,
            tag_id,
            TaskTagLinkData {
                value: link.value,
                display_text: link.display_text,
                icon_name: link.icon_name,
            },
        )
        .await?;
    }
    Ok(())
}

async fn upsert_link(
    conn: &mut PgConnection,
    task_id: Uuid,
    tag_id: Uuid,
    link: TaskTagLinkData,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO task_tag (task_id, tag_id, value, display_text, icon_name, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (task_id, tag_id) DO UPDATE
        SET value = EXCLUDED.value,
            display_text = EXCLUDED.display_text,
            icon_name = EXCLUDED.icon_name
        "#,
    )
    .bind(task_id)
    .bind(tag_id)
    .bind(link.value)
    .bind(link.display_text)
    .bind(link.icon_name)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

impl EntityTable for PgTaskRepository {
    type Filter = TaskFilter;

    const ENTITY: &'static str = "task";
    const OWNER_PROBE: Option<&'static str> = Some("SELECT user_id FROM task WHERE id = $1");

    fn predicate(filter: &TaskFilter, ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::owned_by("t.user_id", &ctx.user_id);
        p.eq_opt("t.completed", filter.completed)
            .eq_opt("t.status", filter.status.map(|s| s.as_str()))
            .eq_opt("t.priority", filter.priority.map(|s| s.as_str()))
            .eq_opt("t.task_list_id", filter.task_list_id)
            .between("t.scheduled_date", filter.scheduled_from, filter.scheduled_to)
            .search(&["t.title", "t.description"], filter.search.as_deref());

        let tags: Vec<String> = filter
            .tags
            .iter()
            .map(|name| normalize_tag_name(name))
            .filter(|name| !name.is_empty())
            .collect();
        if !tags.is_empty() {
            p.with_param(
                "t.id IN (SELECT tt.task_id FROM task_tag tt JOIN tag g ON g.id = tt.tag_id \
                 WHERE LOWER(g.name) = ANY({}))",
                tags,
            );
        }
        p
    }
}

#[async_trait]
impl EntityService for PgTaskRepository {
    type Entity = Task;
    type Create = CreateTaskRequest;
    type Update = UpdateTaskRequest;
    type Filter = TaskFilter;

    async fn find_all(&self, filter: TaskFilter, ctx: &AuthContext) -> Result<Vec<Task>> {
        let order = order_by(
            TASK_SORTS,
            filter.sort_by.as_deref(),
            filter.sort_order,
            ("created_at", SortOrder::Desc),
            "t.id",
        )?;
        let (limit, offset) = page(filter.limit, filter.offset)?;

        let mut predicate = Self::predicate(&filter, ctx);
        let page_sql = predicate.page_sql(limit, offset);
        let sql = format!(
            "SELECT {} FROM task t WHERE {} ORDER BY {} {}",
            TASK_COLUMNS,
            predicate.where_sql(),
            order,
            page_sql
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let tasks = rows.iter().map(map_task_row).collect::<Result<Vec<_>>>()?;
        let tasks = self.enrich(tasks, &ctx.user_id).await?;
        log_read(Self::ENTITY, "find_all", ctx, tasks.len());
        Ok(tasks)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Task>> {
        let task = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(task.is_some()));
        Ok(task)
    }

    async fn create(&self, data: CreateTaskRequest, ctx: &AuthContext) -> Result<Task> {
        let title = require_name("title", &data.title, TASK_TITLE_MAX_LEN)?;
        let (completed, status) =
            TaskStatus::resolve(data.completed, data.status, false, TaskStatus::NotStarted)
                .map_err(|m| Error::invalid_field("status", m))?;
        let links = prepare_tag_links(data.tags)?;

        let id = new_v7();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut created_default = false;
        let task_list_id = match data.task_list_id {
            Some(list_id) => {
                ensure_owner::<PgTaskListRepository, _>(&mut *tx, list_id, ctx).await?;
                list_id
            }
            None => {
                let (list_id, created) = ensure_default_list(&mut *tx, &ctx.user_id).await?;
                created_default = created;
                list_id
            }
        };

        sqlx::query(
            r#"
            INSERT INTO task (id, user_id, task_list_id, title, description, completed,
                              completed_at, status, priority, scheduled_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id)
        .bind(&ctx.user_id)
        .bind(task_list_id)
        .bind(&title)
        .bind(data.description.map(|d| d.trim().to_string()))
        .bind(completed)
        .bind(completed.then_some(now))
        .bind(status.as_str())
        .bind(data.priority.unwrap_or_default().as_str())
        .bind(data.scheduled_date)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let link_count = links.len() as u64;
        link_tags(&mut *tx, id, links).await?;
        tx.commit().await.map_err(Error::Database)?;

        if created_default {
            self.cache.invalidate(&ctx.user_id).await;
        }
        log_mutation(Self::ENTITY, "create", ctx, 1 + link_count);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Task {} missing after insert", id)))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateTaskRequest,
        ctx: &AuthContext,
    ) -> Result<Option<Task>> {
        let title = data
            .title
            .as_deref()
            .map(|t| require_name("title", t, TASK_TITLE_MAX_LEN))
            .transpose()?;
        let links = data.tags.map(prepare_tag_links).transpose()?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;
        if let Some(list_id) = data.task_list_id {
            ensure_owner::<PgTaskListRepository, _>(&mut *tx, list_id, ctx).await?;
        }

        let (current_completed, current_status) = Self::lock_completion(&mut *tx, id).await?;
        let (completed, status) = TaskStatus::resolve(
            data.completed,
            data.status,
            current_completed,
            current_status,
        )
        .map_err(|m| Error::invalid_field("status", m))?;

        let mut set = UpdateSet::touching("updated_at", Utc::now());
        set.set_opt("title", title)
            .set_opt("description", data.description.map(|d| d.map(|d| d.trim().to_string())))
            .set_opt("task_list_id", data.task_list_id)
            .set_opt("priority", data.priority.map(|p| p.as_str()))
            .set_opt("scheduled_date", data.scheduled_date);
        if status != current_status {
            set.set("status", status.as_str());
        }
        if completed != current_completed {
            set.set("completed", completed);
            // $1 is the modification timestamp.
            set.set_with(
                "completed_at",
                "CASE WHEN {} THEN $1 ELSE NULL END",
                completed,
            );
        }

        let id_param = set.bind_where(id);
        let owner_param = set.bind_where(ctx.user_id.as_str());
        let sql = format!(
            "UPDATE task SET {} WHERE id = {} AND user_id = {}",
            set.assignments_sql(),
            id_param,
            owner_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        if let Some(links) = links {
            sqlx::query("DELETE FROM task_tag WHERE task_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            link_tags(&mut *tx, id, links).await?;
        }
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let rows = sqlx::query("DELETE FROM task WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(&ctx.user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        log_mutation(Self::ENTITY, "delete", ctx, rows);
        Ok(rows > 0)
    }
}

#[async_trait]
impl TaskService for PgTaskRepository {
    async fn toggle_completion(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;

        let (current_completed, current_status) = Self::lock_completion(&mut *tx, id).await?;
        let (completed, status) =
            TaskStatus::resolve(Some(!current_completed), None, current_completed, current_status)
                .map_err(Error::Internal)?;
        let now = Utc::now();

        let rows = sqlx::query(
            r#"
            UPDATE task
            SET completed = $1, status = $2, completed_at = $3, updated_at = $4
            WHERE id = $5 AND user_id = $6
            "#,
        )
        .bind(completed)
        .bind(status.as_str())
        .bind(completed.then_some(now))
        .bind(now)
        .bind(id)
        .bind(&ctx.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "toggle_completion", ctx, rows);
        self.fetch(id).await
    }

    async fn find_overdue(&self, ctx: &AuthContext) -> Result<Vec<Task>> {
        let mut p = PredicateBuilder::owned_by("t.user_id", &ctx.user_id);
        p.raw("t.completed = FALSE")
            .with_param("t.scheduled_date < {}", Utc::now());
        let sql = format!(
            "SELECT {} FROM task t WHERE {} ORDER BY t.scheduled_date ASC, t.id",
            TASK_COLUMNS,
            p.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), p.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let tasks = rows.iter().map(map_task_row).collect::<Result<Vec<_>>>()?;
        let tasks = self.enrich(tasks, &ctx.user_id).await?;
        log_read(Self::ENTITY, "find_overdue", ctx, tasks.len());
        Ok(tasks)
    }

    async fn bulk_update(
        &self,
        ids: &[Uuid],
        data: BulkTaskUpdate,
        ctx: &AuthContext,
    ) -> Result<Vec<Task>> {
        let ids = validate_batch(ids)?;
        if data.is_empty() {
            return Err(Error::validation("No fields to update"));
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owns_all(&mut *tx, Self::ENTITY, OWNED_COUNT_SQL, &ids, ctx).await?;
        if let Some(list_id) = data.task_list_id {
            ensure_owner::<PgTaskListRepository, _>(&mut *tx, list_id, ctx).await?;
        }

        let mut set = UpdateSet::touching("updated_at", Utc::now());
        set.set_opt("priority", data.priority.map(|p| p.as_str()))
            .set_opt("task_list_id", data.task_list_id)
            .set_opt("scheduled_date", data.scheduled_date);
        if let Some(completed) = data.completed {
            set.set("completed", completed)
                .set_with(
                    "status",
                    "CASE WHEN {} THEN 'done' WHEN status = 'done' THEN 'not_started' ELSE status END",
                    completed,
                )
                .set_with(
                    "completed_at",
                    "CASE WHEN {} THEN COALESCE(completed_at, $1) ELSE NULL END",
                    completed,
                );
        }

        let ids_param = set.bind_where(ids.clone());
        let owner_param = set.bind_where(ctx.user_id.as_str());
        let sql = format!(
            "UPDATE task SET {} WHERE id = ANY({}) AND user_id = {}",
            set.assignments_sql(),
            ids_param,
            owner_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "bulk_update", ctx, rows);
        self.fetch_many(&ids, ctx).await
    }

    async fn bulk_delete(&self, ids: &[Uuid], ctx: &AuthContext) -> Result<u64> {
        let ids = validate_batch(ids)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owns_all(&mut *tx, Self::ENTITY, OWNED_COUNT_SQL, &ids, ctx).await?;

        let rows = sqlx::query("DELETE FROM task WHERE id = ANY($1) AND user_id = $2")
            .bind(&ids)
            .bind(&ctx.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "bulk_delete", ctx, rows);
        Ok(rows)
    }

    async fn attach_tag(
        &self,
        task_id: Uuid,
        tag_id: Uuid,
        link: TaskTagLinkData,
        ctx: &AuthContext,
    ) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, task_id, ctx).await?;

        let tag_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tag WHERE id = $1)")
            .bind(tag_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if !tag_exists {
            return Err(Error::invalid_field("tag_id", format!("Tag {} does not exist", tag_id)));
        }

        upsert_link(&mut *tx, task_id, tag_id, link).await?;
        sqlx::query("UPDATE task SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "attach_tag", ctx, 1);
        self.fetch(task_id).await
    }

    async fn detach_tag(&self, task_id: Uuid, tag_id: Uuid, ctx: &AuthContext) -> Result<bool> {
        ensure_owner::<Self, _>(&self.pool, task_id, ctx).await?;

        let rows = sqlx::query("DELETE FROM task_tag WHERE task_id = $1 AND tag_id = $2")
            .bind(task_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        log_mutation(Self::ENTITY, "detach_tag", ctx, rows);
        Ok(rows > 0)
    }
}

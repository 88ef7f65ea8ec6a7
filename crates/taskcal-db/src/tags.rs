//! Tag repository implementation.
//!
//! Tags are global rather than user-scoped: names are unique case-insensitively
//! across all users and stored normalized (trimmed, lowercased). Every read
//! carries the tag's current link count.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use taskcal_core::defaults::{PAGE_LIMIT_MAX, TAG_STATS_TOP_N};
use taskcal_core::validation::{normalize_tag_name, validate_hex_color, validate_tag_name};
use taskcal_core::{
    new_v7, AuthContext, CreateTagRequest, EntityService, Error, Result, Tag, TagCleanupResult,
    TagFilter, TagService, TagStatistics, TagType, TagTypeCount, UpdateTagRequest,
};

use crate::entity::{
    ensure_owner, log_mutation, log_read, map_unique_violation, parse_column, validate_batch,
    EntityTable,
};
use crate::filter::{bind_params, PredicateBuilder, UpdateSet};

const TAG_SELECT: &str = r#"
    SELECT g.id, g.name, g.tag_type, g.color, g.created_at, g.updated_at,
           (SELECT COUNT(*) FROM task_tag tt WHERE tt.tag_id = g.id) AS usage_count
    FROM tag g
"#;

/// PostgreSQL implementation of TagService.
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Tag>> {
        let row = sqlx::query(&format!("{} WHERE g.id = $1", TAG_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(map_tag_row).transpose()
    }

    async fn name_taken(&self, name: &str, excluding: Option<Uuid>) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tag WHERE LOWER(name) = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }
}

fn map_tag_row(r: &PgRow) -> Result<Tag> {
    Ok(Tag {
        id: r.get("id"),
        name: r.get("name"),
        tag_type: parse_column(r, "tag_type")?,
        color: r.get("color"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        usage_count: r.get("usage_count"),
    })
}

/// Id of the tag named `name` (already normalized), inserting it when absent.
/// Safe against a concurrent insert of the same name.
pub(crate) async fn find_or_create_tag(
    conn: &mut PgConnection,
    name: &str,
    tag_type: TagType,
    color: Option<&str>,
) -> Result<Uuid> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO tag (id, name, tag_type, color, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT ((LOWER(name))) DO NOTHING
        "#,
    )
    .bind(new_v7())
    .bind(name)
    .bind(tag_type.as_str())
    .bind(color)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    sqlx::query_scalar("SELECT id FROM tag WHERE LOWER(name) = LOWER($1)")
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::Database)
}

impl EntityTable for PgTagRepository {
    type Filter = TagFilter;

    const ENTITY: &'static str = "tag";
    const OWNER_PROBE: Option<&'static str> = None;

    fn predicate(filter: &TagFilter, _ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::new();
        p.eq_opt("g.tag_type", filter.tag_type.map(|t| t.as_str()))
            .search(&["g.name"], filter.search.as_deref());
        p
    }
}

#[async_trait]
impl EntityService for PgTagRepository {
    type Entity = Tag;
    type Create = CreateTagRequest;
    type Update = UpdateTagRequest;
    type Filter = TagFilter;

    async fn find_all(&self, filter: TagFilter, ctx: &AuthContext) -> Result<Vec<Tag>> {
        let predicate = Self::predicate(&filter, ctx);
        let sql = format!(
            "{} WHERE {} ORDER BY g.name ASC, g.id",
            TAG_SELECT,
            predicate.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let tags = rows.iter().map(map_tag_row).collect::<Result<Vec<_>>>()?;
        log_read(Self::ENTITY, "find_all", ctx, tags.len());
        Ok(tags)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Tag>> {
        let tag = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(tag.is_some()));
        Ok(tag)
    }

    async fn create(&self, data: CreateTagRequest, ctx: &AuthContext) -> Result<Tag> {
        let name = validate_tag_name(&data.name)?;
        if let Some(color) = &data.color {
            validate_hex_color("color", color)?;
        }
        let duplicate = format!("Tag '{}' already exists", name);
        if self.name_taken(&name, None).await? {
            return Err(Error::invalid_field("name", duplicate));
        }

        let id = new_v7();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tag (id, name, tag_type, color, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(data.tag_type.unwrap_or_default().as_str())
        .bind(&data.color)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, duplicate))?;

        log_mutation(Self::ENTITY, "create", ctx, 1);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Tag {} missing after insert", id)))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateTagRequest,
        ctx: &AuthContext,
    ) -> Result<Option<Tag>> {
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let mut set = UpdateSet::touching("updated_at", Utc::now());
        let mut duplicate = "A tag with this name already exists".to_string();
        if let Some(name) = &data.name {
            let name = validate_tag_name(name)?;
            duplicate = format!("Tag '{}' already exists", name);
            if self.name_taken(&name, Some(id)).await? {
                return Err(Error::invalid_field("name", duplicate));
            }
            set.set("name", name);
        }
        if let Some(tag_type) = data.tag_type {
            set.set("tag_type", tag_type.as_str());
        }
        if let Some(color) = data.color {
            if let Some(color) = &color {
                validate_hex_color("color", color)?;
            }
            set.set("color", color);
        }

        let id_param = set.bind_where(id);
        let sql = format!(
            "UPDATE tag SET {} WHERE id = {}",
            set.assignments_sql(),
            id_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, duplicate))?
            .rows_affected();

        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM tag WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        log_mutation(Self::ENTITY, "delete", ctx, rows);
        Ok(rows > 0)
    }
}

#[async_trait]
impl TagService for PgTagRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let name = normalize_tag_name(name);
        if name.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(&format!("{} WHERE LOWER(g.name) = $1", TAG_SELECT))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(map_tag_row).transpose()
    }

    async fn find_or_create(&self, data: CreateTagRequest, ctx: &AuthContext) -> Result<Tag> {
        let name = validate_tag_name(&data.name)?;
        if let Some(color) = &data.color {
            validate_hex_color("color", color)?;
        }

        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let id = find_or_create_tag(
            &mut *conn,
            &name,
            data.tag_type.unwrap_or_default(),
            data.color.as_deref(),
        )
        .await?;
        drop(conn);

        log_mutation(Self::ENTITY, "find_or_create", ctx, 1);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Tag {} vanished", id)))
    }

    async fn merge(&self, source_ids: &[Uuid], target_id: Uuid, ctx: &AuthContext) -> Result<Tag> {
        let sources = validate_batch(source_ids)?;
        if sources.contains(&target_id) {
            return Err(Error::invalid_field(
                "source_ids",
                "Cannot merge a tag into itself",
            ));
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag WHERE id = ANY($1) OR id = $2")
            .bind(&sources)
            .bind(target_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if found != sources.len() as i64 + 1 {
            return Err(Error::validation(
                "Every source tag and the target tag must exist",
            ));
        }

        // A task already linked to the target keeps its target link.
        let dropped = sqlx::query(
            r#"
            DELETE FROM task_tag s
            WHERE s.tag_id = ANY($1)
              AND EXISTS (SELECT 1 FROM task_tag t WHERE t.task_id = s.task_id AND t.tag_id = $2)
            "#,
        )
        .bind(&sources)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        // A task linked to several sources keeps only one of those links.
        let collapsed = sqlx::query(
            r#"
            DELETE FROM task_tag s
            WHERE s.tag_id = ANY($1)
              AND EXISTS (
                  SELECT 1 FROM task_tag o
                  WHERE o.task_id = s.task_id AND o.tag_id = ANY($1) AND o.tag_id < s.tag_id
              )
            "#,
        )
        .bind(&sources)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let repointed = sqlx::query("UPDATE task_tag SET tag_id = $1 WHERE tag_id = ANY($2)")
            .bind(target_id)
            .bind(&sources)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let removed = sqlx::query("DELETE FROM tag WHERE id = ANY($1)")
            .bind(&sources)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        sqlx::query("UPDATE tag SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = Self::ENTITY,
            op = "merge",
            request_id = %ctx.request_id,
            user_id = %ctx.user_id,
            target_id = %target_id,
            source_count = sources.len(),
            links_repointed = repointed,
            links_dropped = dropped + collapsed,
            tags_removed = removed,
            "Tags merged"
        );

        self.fetch(target_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Merge target {} vanished", target_id)))
    }

    async fn cleanup_unused(&self, ctx: &AuthContext) -> Result<TagCleanupResult> {
        let removed_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM tag g
            WHERE NOT EXISTS (SELECT 1 FROM task_tag tt WHERE tt.tag_id = g.id)
            RETURNING g.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "cleanup_unused", ctx, removed_ids.len() as u64);
        Ok(TagCleanupResult {
            removed_count: removed_ids.len(),
            removed_ids,
        })
    }

    async fn get_statistics(&self, top_n: Option<i64>) -> Result<TagStatistics> {
        let top_n = top_n.unwrap_or(TAG_STATS_TOP_N);
        if !(1..=PAGE_LIMIT_MAX).contains(&top_n) {
            return Err(Error::invalid_field(
                "top_n",
                format!("top_n must be between 1 and {}", PAGE_LIMIT_MAX),
            ));
        }

        let total_tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tag")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        let by_type = sqlx::query(
            "SELECT tag_type, COUNT(*) AS count FROM tag GROUP BY tag_type ORDER BY count DESC, tag_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(|r| {
            Ok(TagTypeCount {
                tag_type: parse_column(r, "tag_type")?,
                count: r.get("count"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let most_used = sqlx::query(&format!(
            "{} ORDER BY usage_count DESC, g.name ASC LIMIT $1",
            TAG_SELECT
        ))
        .bind(top_n)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(map_tag_row)
        .collect::<Result<Vec<_>>>()?;

        Ok(TagStatistics {
            total_tags,
            by_type,
            most_used,
        })
    }
}

//! Attachment repository implementation.
//!
//! Attachments have no owner column; ownership is that of the task they belong
//! to, so every probe and list query joins `task`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use taskcal_core::defaults::{MAX_ATTACHMENTS_PER_TASK, MAX_ATTACHMENT_BYTES};
use taskcal_core::validation::{mime_category, validate_filename, validate_mime_type, validate_url};
use taskcal_core::{
    new_v7, Attachment, AttachmentFilter, AttachmentService, AuthContext, CreateAttachmentRequest,
    EntityService, Error, MimeCategoryUsage, Result, StorageStats, UpdateAttachmentRequest,
};

use crate::enrich::{self, distinct};
use crate::entity::{ensure_owner, log_mutation, log_read, EntityTable};
use crate::filter::{bind_params, PredicateBuilder};
use crate::tasks::PgTaskRepository;

const ATTACHMENT_SELECT: &str = r#"
    SELECT a.id, a.task_id, a.filename, a.url, a.mime_type, a.size_bytes, a.created_at,
           t.user_id AS owner_id
    FROM attachment a
    JOIN task t ON t.id = a.task_id
"#;

/// PostgreSQL implementation of AttachmentService.
pub struct PgAttachmentRepository {
    pool: Pool<Postgres>,
}

impl PgAttachmentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Attachment>> {
        let row = sqlx::query(&format!("{} WHERE a.id = $1", ATTACHMENT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let owner: String = row.get("owner_id");
        Ok(self
            .enrich(vec![map_attachment_row(&row)], &owner)
            .await?
            .pop())
    }

    /// Attach owning task summaries with a single query.
    async fn enrich(&self, mut attachments: Vec<Attachment>, owner: &str) -> Result<Vec<Attachment>> {
        let task_ids = distinct(attachments.iter().map(|a| a.task_id));
        let tasks = enrich::task_summaries(&self.pool, owner, &task_ids).await?;
        for attachment in &mut attachments {
            attachment.task = tasks.get(&attachment.task_id).cloned();
        }
        Ok(attachments)
    }
}

pub(crate) fn map_attachment_row(r: &PgRow) -> Attachment {
    Attachment {
        id: r.get("id"),
        task_id: r.get("task_id"),
        filename: r.get("filename"),
        url: r.get("url"),
        mime_type: r.get("mime_type"),
        size_bytes: r.get("size_bytes"),
        created_at: r.get("created_at"),
        task: None,
    }
}

fn validate_size(size_bytes: i64) -> Result<()> {
    if size_bytes < 0 {
        return Err(Error::invalid_field("size_bytes", "File size cannot be negative"));
    }
    if size_bytes > MAX_ATTACHMENT_BYTES {
        return Err(Error::invalid_field(
            "size_bytes",
            format!(
                "File size {} bytes exceeds the limit of {} bytes",
                size_bytes, MAX_ATTACHMENT_BYTES
            ),
        ));
    }
    Ok(())
}

/// Fold per-MIME-type totals into top-level categories, largest first.
fn fold_categories(per_type: Vec<(String, i64, i64)>) -> Vec<MimeCategoryUsage> {
    let mut totals: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for (mime_type, files, bytes) in per_type {
        let entry = totals.entry(mime_category(&mime_type).to_string()).or_default();
        entry.0 += files;
        entry.1 += bytes;
    }
    let mut usage: Vec<MimeCategoryUsage> = totals
        .into_iter()
        .map(|(category, (file_count, total_bytes))| MimeCategoryUsage {
            category,
            file_count,
            total_bytes,
        })
        .collect();
    usage.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));
    usage
}

impl EntityTable for PgAttachmentRepository {
    type Filter = AttachmentFilter;

    const ENTITY: &'static str = "attachment";
    const OWNER_PROBE: Option<&'static str> =
        Some("SELECT t.user_id FROM attachment a JOIN task t ON t.id = a.task_id WHERE a.id = $1");

    fn predicate(filter: &AttachmentFilter, ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::owned_by("t.user_id", &ctx.user_id);
        p.eq_opt("a.task_id", filter.task_id)
            .eq_opt(
                "a.mime_type",
                filter.file_type.as_deref().map(|m| m.trim().to_lowercase()),
            )
            .search(&["a.filename"], filter.search.as_deref());
        p
    }
}

#[async_trait]
impl EntityService for PgAttachmentRepository {
    type Entity = Attachment;
    type Create = CreateAttachmentRequest;
    type Update = UpdateAttachmentRequest;
    type Filter = AttachmentFilter;

    async fn find_all(&self, filter: AttachmentFilter, ctx: &AuthContext) -> Result<Vec<Attachment>> {
        let predicate = Self::predicate(&filter, ctx);
        let sql = format!(
            "{} WHERE {} ORDER BY a.created_at DESC, a.id",
            ATTACHMENT_SELECT,
            predicate.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let attachments = self
            .enrich(rows.iter().map(map_attachment_row).collect(), &ctx.user_id)
            .await?;
        log_read(Self::ENTITY, "find_all", ctx, attachments.len());
        Ok(attachments)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Attachment>> {
        let attachment = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(attachment.is_some()));
        Ok(attachment)
    }

    async fn create(&self, data: CreateAttachmentRequest, ctx: &AuthContext) -> Result<Attachment> {
        let filename = validate_filename(&data.filename)?;
        validate_url(&data.url)?;
        let mime_type = data.mime_type.trim().to_lowercase();
        validate_mime_type(&mime_type)?;
        validate_size(data.size_bytes)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<PgTaskRepository, _>(&mut *tx, data.task_id, ctx).await?;

        // Lock the task so concurrent uploads cannot both pass the count check.
        sqlx::query("SELECT id FROM task WHERE id = $1 FOR UPDATE")
            .bind(data.task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachment WHERE task_id = $1")
            .bind(data.task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if existing >= MAX_ATTACHMENTS_PER_TASK {
            return Err(Error::validation(format!(
                "Task already has the maximum of {} attachments",
                MAX_ATTACHMENTS_PER_TASK
            )));
        }

        let id = new_v7();
        sqlx::query(
            r#"
            INSERT INTO attachment (id, task_id, filename, url, mime_type, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(data.task_id)
        .bind(&filename)
        .bind(data.url.trim())
        .bind(&mime_type)
        .bind(data.size_bytes)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "create", ctx, 1);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Attachment {} missing after insert", id)))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateAttachmentRequest,
        ctx: &AuthContext,
    ) -> Result<Option<Attachment>> {
        let filename = data
            .filename
            .as_deref()
            .map(validate_filename)
            .transpose()?;
        if let Some(url) = &data.url {
            validate_url(url)?;
        }
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let rows = sqlx::query(
            r#"
            UPDATE attachment
            SET filename = COALESCE($1, filename), url = COALESCE($2, url)
            WHERE id = $3
            "#,
        )
        .bind(filename)
        .bind(data.url.map(|u| u.trim().to_string()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let rows = sqlx::query("DELETE FROM attachment WHERE id = $1")
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
impl AttachmentService for PgAttachmentRepository {
    async fn get_storage_stats(&self, ctx: &AuthContext) -> Result<StorageStats> {
        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_files,
                   COALESCE(SUM(a.size_bytes), 0)::BIGINT AS total_bytes,
                   COALESCE(MAX(a.size_bytes), 0) AS largest_file_bytes
            FROM attachment a
            JOIN task t ON t.id = a.task_id
            WHERE t.user_id = $1
            "#,
        )
        .bind(&ctx.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let per_type: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT a.mime_type, COUNT(*), COALESCE(SUM(a.size_bytes), 0)::BIGINT
            FROM attachment a
            JOIN task t ON t.id = a.task_id
            WHERE t.user_id = $1
            GROUP BY a.mime_type
            "#,
        )
        .bind(&ctx.user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let stats = StorageStats {
            total_files: totals.get("total_files"),
            total_bytes: totals.get("total_bytes"),
            largest_file_bytes: totals.get("largest_file_bytes"),
            by_category: fold_categories(per_type),
        };
        log_read(Self::ENTITY, "get_storage_stats", ctx, stats.by_category.len());
        Ok(stats)
    }
}

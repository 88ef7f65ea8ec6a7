//! Batched enrichment of fetched rows.
//!
//! Every loader here issues exactly one query for a whole batch, keyed by the
//! distinct foreign keys present in it, and returns a map the caller merges
//! back onto its rows. Each query carries the owner restriction as `$1`.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use taskcal_core::{
    Attachment, CalendarSummary, Error, Result, TaskListSummary, TaskSummary, TaskTag,
};

use crate::attachments::map_attachment_row;
use crate::cache::{select_summaries, TaskListCache};
use crate::entity::parse_column;
use crate::task_lists::fetch_user_lists;

/// Distinct values in first-seen order.
pub fn distinct<I>(values: I) -> Vec<Uuid>
where
    I: IntoIterator<Item = Uuid>,
{
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(*v)).collect()
}

/// Group items by key, keeping input order inside each group.
pub fn group_by<K, V, F>(items: Vec<V>, key: F) -> HashMap<K, Vec<V>>
where
    K: Eq + Hash,
    F: Fn(&V) -> K,
{
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

/// List summaries for `ids`, served from the per-user cache.
pub(crate) async fn task_list_summaries(
    pool: &PgPool,
    cache: &TaskListCache,
    owner: &str,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, TaskListSummary>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let lists = cache
        .get_or_load(owner, || fetch_user_lists(pool, owner))
        .await?;
    Ok(select_summaries(&lists, ids))
}

/// Attachments of the given tasks, grouped by task id.
pub(crate) async fn attachments_by_task(
    pool: &PgPool,
    owner: &str,
    task_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Attachment>>> {
    if task_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.task_id, a.filename, a.url, a.mime_type, a.size_bytes, a.created_at
        FROM attachment a
        JOIN task t ON t.id = a.task_id
        WHERE t.user_id = $1 AND a.task_id = ANY($2)
        ORDER BY a.created_at, a.id
        "#,
    )
    .bind(owner)
    .bind(task_ids.to_vec())
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    let attachments = rows.iter().map(map_attachment_row).collect();
    Ok(group_by(attachments, |a: &Attachment| a.task_id))
}

/// Tag links of the given tasks joined with tag metadata, grouped by task id.
pub(crate) async fn tag_links_by_task(
    pool: &PgPool,
    owner: &str,
    task_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<TaskTag>>> {
    if task_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT tt.task_id, g.id AS tag_id, g.name, g.tag_type, g.color,
               tt.value, tt.display_text, tt.icon_name
        FROM task_tag tt
        JOIN tag g ON g.id = tt.tag_id
        JOIN task t ON t.id = tt.task_id
        WHERE t.user_id = $1 AND tt.task_id = ANY($2)
        ORDER BY g.name
        "#,
    )
    .bind(owner)
    .bind(task_ids.to_vec())
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    let mut links: HashMap<Uuid, Vec<TaskTag>> = HashMap::new();
    for r in &rows {
        let task_id: Uuid = r.get("task_id");
        links.entry(task_id).or_default().push(TaskTag {
            tag_id: r.get("tag_id"),
            name: r.get("name"),
            tag_type: parse_column(r, "tag_type")?,
            color: r.get("color"),
            value: r.get("value"),
            display_text: r.get("display_text"),
            icon_name: r.get("icon_name"),
        });
    }
    Ok(links)
}

/// Calendar summaries keyed by calendar id.
pub(crate) async fn calendar_summaries(
    pool: &PgPool,
    owner: &str,
    calendar_ids: &[Uuid],
) -> Result<HashMap<Uuid, CalendarSummary>> {
    if calendar_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        "SELECT id, name, color, is_visible FROM calendar WHERE user_id = $1 AND id = ANY($2)",
    )
    .bind(owner)
    .bind(calendar_ids.to_vec())
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let summary = CalendarSummary {
                id: r.get("id"),
                name: r.get("name"),
                color: r.get("color"),
                is_visible: r.get("is_visible"),
            };
            (summary.id, summary)
        })
        .collect())
}

/// Task summaries keyed by task id.
pub(crate) async fn task_summaries(
    pool: &PgPool,
    owner: &str,
    task_ids: &[Uuid],
) -> Result<HashMap<Uuid, TaskSummary>> {
    if task_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        "SELECT id, title, completed, task_list_id FROM task WHERE user_id = $1 AND id = ANY($2)",
    )
    .bind(owner)
    .bind(task_ids.to_vec())
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let summary = TaskSummary {
                id: r.get("id"),
                title: r.get("title"),
                completed: r.get("completed"),
                task_list_id: r.get("task_list_id"),
            };
            (summary.id, summary)
        })
        .collect())
}

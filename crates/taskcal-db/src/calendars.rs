//! Calendar repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use uuid::Uuid;

use taskcal_core::defaults::{CALENDAR_NAME_MAX_LEN, DEFAULT_CALENDAR_COLOR, DEFAULT_CALENDAR_NAME};
use taskcal_core::validation::{require_name, validate_hex_color};
use taskcal_core::{
    new_v7, AuthContext, Calendar, CalendarFilter, CalendarService, CreateCalendarRequest,
    EntityService, Error, Result, UpdateCalendarRequest,
};

use crate::entity::{ensure_owner, log_mutation, log_read, map_unique_violation, EntityTable};
use crate::filter::{bind_params, PredicateBuilder, UpdateSet};

const CALENDAR_COLUMNS: &str = "c.id, c.user_id, c.name, c.color, c.description, c.is_visible, \
     c.is_default, c.created_at, c.updated_at";

const DEFAULT_RACE: &str = "Another calendar became the default concurrently; retry";

/// PostgreSQL implementation of CalendarService.
pub struct PgCalendarRepository {
    pool: Pool<Postgres>,
}

impl PgCalendarRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Calendar>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM calendar c WHERE c.id = $1",
            CALENDAR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(map_calendar_row))
    }
}

fn map_calendar_row(r: &PgRow) -> Calendar {
    Calendar {
        id: r.get("id"),
        user_id: r.get("user_id"),
        name: r.get("name"),
        color: r.get("color"),
        description: r.get("description"),
        is_visible: r.get("is_visible"),
        is_default: r.get("is_default"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

/// Id of the user's default calendar, creating a "Personal" one when the user
/// has none.
pub(crate) async fn ensure_default_calendar(conn: &mut PgConnection, user_id: &str) -> Result<Uuid> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO calendar (id, user_id, name, color, description, is_visible, is_default, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NULL, TRUE, TRUE, $5, $5)
        ON CONFLICT (user_id) WHERE is_default DO NOTHING
        "#,
    )
    .bind(new_v7())
    .bind(user_id)
    .bind(DEFAULT_CALENDAR_NAME)
    .bind(DEFAULT_CALENDAR_COLOR)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    sqlx::query_scalar("SELECT id FROM calendar WHERE user_id = $1 AND is_default")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::Database)
}

impl EntityTable for PgCalendarRepository {
    type Filter = CalendarFilter;

    const ENTITY: &'static str = "calendar";
    const OWNER_PROBE: Option<&'static str> = Some("SELECT user_id FROM calendar WHERE id = $1");

    fn predicate(filter: &CalendarFilter, ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::owned_by("c.user_id", &ctx.user_id);
        p.eq_opt("c.is_visible", filter.is_visible)
            .search(&["c.name", "c.description"], filter.search.as_deref());
        p
    }
}

#[async_trait]
impl EntityService for PgCalendarRepository {
    type Entity = Calendar;
    type Create = CreateCalendarRequest;
    type Update = UpdateCalendarRequest;
    type Filter = CalendarFilter;

    async fn find_all(&self, filter: CalendarFilter, ctx: &AuthContext) -> Result<Vec<Calendar>> {
        let predicate = Self::predicate(&filter, ctx);
        let sql = format!(
            "SELECT {} FROM calendar c WHERE {} ORDER BY c.is_default DESC, c.name ASC, c.id",
            CALENDAR_COLUMNS,
            predicate.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let calendars: Vec<Calendar> = rows.iter().map(map_calendar_row).collect();
        log_read(Self::ENTITY, "find_all", ctx, calendars.len());
        Ok(calendars)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Calendar>> {
        let calendar = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(calendar.is_some()));
        Ok(calendar)
    }

    /// The user's first calendar becomes the default whatever `is_default` says.
    async fn create(&self, data: CreateCalendarRequest, ctx: &AuthContext) -> Result<Calendar> {
        let name = require_name("name", &data.name, CALENDAR_NAME_MAX_LEN)?;
        let color = data
            .color
            .unwrap_or_else(|| DEFAULT_CALENDAR_COLOR.to_string());
        validate_hex_color("color", &color)?;

        let id = new_v7();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let has_default: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM calendar WHERE user_id = $1 AND is_default)",
        )
        .bind(&ctx.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let make_default = !has_default || data.is_default.unwrap_or(false);
        if make_default && has_default {
            sqlx::query(
                "UPDATE calendar SET is_default = FALSE, updated_at = $1 WHERE user_id = $2 AND is_default",
            )
            .bind(now)
            .bind(&ctx.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        sqlx::query(
            r#"
            INSERT INTO calendar (id, user_id, name, color, description, is_visible, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(id)
        .bind(&ctx.user_id)
        .bind(&name)
        .bind(&color)
        .bind(data.description.map(|d| d.trim().to_string()))
        .bind(data.is_visible.unwrap_or(true))
        .bind(make_default)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, DEFAULT_RACE))?;

        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "create", ctx, 1);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Calendar {} missing after insert", id)))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateCalendarRequest,
        ctx: &AuthContext,
    ) -> Result<Option<Calendar>> {
        let name = data
            .name
            .as_deref()
            .map(|n| require_name("name", n, CALENDAR_NAME_MAX_LEN))
            .transpose()?;
        if let Some(color) = &data.color {
            validate_hex_color("color", color)?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;

        let is_default: bool =
            sqlx::query_scalar("SELECT is_default FROM calendar WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let mut set = UpdateSet::touching("updated_at", now);
        match data.is_default {
            Some(false) if is_default => {
                return Err(Error::invalid_field(
                    "is_default",
                    "Cannot unset the default calendar; make another calendar the default instead",
                ));
            }
            Some(true) if !is_default => {
                sqlx::query(
                    "UPDATE calendar SET is_default = FALSE, updated_at = $1 WHERE user_id = $2 AND is_default",
                )
                .bind(now)
                .bind(&ctx.user_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
                set.set("is_default", true);
            }
            _ => {}
        }
        set.set_opt("name", name)
            .set_opt("color", data.color)
            .set_opt("description", data.description.map(|d| d.map(|d| d.trim().to_string())))
            .set_opt("is_visible", data.is_visible);

        let id_param = set.bind_where(id);
        let owner_param = set.bind_where(ctx.user_id.as_str());
        let sql = format!(
            "UPDATE calendar SET {} WHERE id = {} AND user_id = {}",
            set.assignments_sql(),
            id_param,
            owner_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique_violation(e, DEFAULT_RACE))?
            .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    /// Events on the calendar go with it.
    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;

        let is_default: bool =
            sqlx::query_scalar("SELECT is_default FROM calendar WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;
        if is_default {
            return Err(Error::validation("Cannot delete the default calendar"));
        }

        let rows = sqlx::query("DELETE FROM calendar WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(&ctx.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "delete", ctx, rows);
        Ok(rows > 0)
    }
}

#[async_trait]
impl CalendarService for PgCalendarRepository {
    async fn get_default(&self, ctx: &AuthContext) -> Result<Calendar> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let id = ensure_default_calendar(&mut *conn, &ctx.user_id).await?;
        drop(conn);

        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Default calendar {} vanished", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_visibility() {
        let ctx = AuthContext::new("alice", "req-1");
        let filter = CalendarFilter {
            is_visible: Some(true),
            search: None,
        };
        let p = PgCalendarRepository::predicate(&filter, &ctx);
        assert_eq!(p.where_sql(), "c.user_id = $1 AND c.is_visible = $2");
    }
}

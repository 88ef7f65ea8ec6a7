//! Event repository implementation.
//!
//! Recurring events are one master row; the rule is validated structurally
//! and stored verbatim, so range filters and conflict checks only ever see the
//! master's own interval.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use taskcal_core::defaults::EVENT_TITLE_MAX_LEN;
use taskcal_core::recurrence::validate_rule;
use taskcal_core::validation::require_name;
use taskcal_core::{
    detect_conflicts, new_v7, validate_event_interval, AuthContext, ConflictQuery,
    CreateEventRequest, EntityService, Error, Event, EventConflict, EventFilter, EventService,
    Result, SortOrder, TimeInterval, UpdateEventRequest,
};

use crate::calendars::{ensure_default_calendar, PgCalendarRepository};
use crate::enrich::{self, distinct};
use crate::entity::{ensure_owner, log_mutation, log_read, EntityTable};
use crate::filter::{bind_params, order_by, page, PredicateBuilder, UpdateSet};

const EVENT_COLUMNS: &str = "e.id, e.user_id, e.calendar_id, e.title, e.description, e.location, \
     e.start_time, e.end_time, e.all_day, e.recurrence_rule, e.created_at, e.updated_at";

const EVENT_SORTS: &[(&str, &str)] = &[
    ("start_time", "e.start_time"),
    ("end_time", "e.end_time"),
    ("title", "LOWER(e.title)"),
    ("created_at", "e.created_at"),
];

/// PostgreSQL implementation of EventService.
pub struct PgEventRepository {
    pool: Pool<Postgres>,
}

impl PgEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {} FROM event e WHERE e.id = $1", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let event = map_event_row(&row);
        let owner = event.user_id.clone();
        Ok(self.enrich(vec![event], &owner).await?.pop())
    }

    /// Attach calendar summaries with a single query.
    async fn enrich(&self, mut events: Vec<Event>, owner: &str) -> Result<Vec<Event>> {
        let calendar_ids = distinct(events.iter().map(|e| e.calendar_id));
        let calendars = enrich::calendar_summaries(&self.pool, owner, &calendar_ids).await?;
        for event in &mut events {
            event.calendar = calendars.get(&event.calendar_id).cloned();
        }
        Ok(events)
    }
}

fn map_event_row(r: &PgRow) -> Event {
    Event {
        id: r.get("id"),
        user_id: r.get("user_id"),
        calendar_id: r.get("calendar_id"),
        title: r.get("title"),
        description: r.get("description"),
        location: r.get("location"),
        start_time: r.get("start_time"),
        end_time: r.get("end_time"),
        all_day: r.get("all_day"),
        recurrence_rule: r.get("recurrence_rule"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        calendar: None,
    }
}

/// Trim a recurrence rule, treating blank as absent, and check its structure.
fn prepare_rule(rule: Option<String>) -> Result<Option<String>> {
    match rule.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
        Some(rule) => {
            validate_rule(&rule)?;
            Ok(Some(rule))
        }
        None => Ok(None),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Prefilter for conflict detection: the caller's events whose interval
/// overlaps the candidate, under the open-interval test.
fn conflict_predicate(query: &ConflictQuery, ctx: &AuthContext) -> PredicateBuilder {
    let mut p = PredicateBuilder::owned_by("e.user_id", &ctx.user_id);
    p.with_param("e.start_time < {}", query.end_time)
        .with_param("e.end_time > {}", query.start_time);
    if let Some(exclude) = query.exclude_event_id {
        p.with_param("e.id <> {}", exclude);
    }
    p.eq_opt("e.calendar_id", query.calendar_id);
    p
}

impl EntityTable for PgEventRepository {
    type Filter = EventFilter;

    const ENTITY: &'static str = "event";
    const OWNER_PROBE: Option<&'static str> = Some("SELECT user_id FROM event WHERE id = $1");

    fn predicate(filter: &EventFilter, ctx: &AuthContext) -> PredicateBuilder {
        let mut p = PredicateBuilder::owned_by("e.user_id", &ctx.user_id);
        p.eq_opt("e.calendar_id", filter.calendar_id)
            .eq_opt("e.all_day", filter.all_day)
            .between("e.start_time", filter.from, filter.to)
            .search(
                &["e.title", "e.description", "e.location"],
                filter.search.as_deref(),
            );
        p
    }
}

#[async_trait]
impl EntityService for PgEventRepository {
    type Entity = Event;
    type Create = CreateEventRequest;
    type Update = UpdateEventRequest;
    type Filter = EventFilter;

    async fn find_all(&self, filter: EventFilter, ctx: &AuthContext) -> Result<Vec<Event>> {
        let order = order_by(
            EVENT_SORTS,
            filter.sort_by.as_deref(),
            filter.sort_order,
            ("start_time", SortOrder::Asc),
            "e.id",
        )?;
        let (limit, offset) = page(filter.limit, filter.offset)?;

        let mut predicate = Self::predicate(&filter, ctx);
        let page_sql = predicate.page_sql(limit, offset);
        let sql = format!(
            "SELECT {} FROM event e WHERE {} ORDER BY {} {}",
            EVENT_COLUMNS,
            predicate.where_sql(),
            order,
            page_sql
        );
        let rows = bind_params!(sqlx::query(&sql), predicate.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let events = self
            .enrich(rows.iter().map(map_event_row).collect(), &ctx.user_id)
            .await?;
        log_read(Self::ENTITY, "find_all", ctx, events.len());
        Ok(events)
    }

    async fn find_by_id(&self, id: Uuid, ctx: &AuthContext) -> Result<Option<Event>> {
        let event = self.fetch(id).await?;
        log_read(Self::ENTITY, "find_by_id", ctx, usize::from(event.is_some()));
        Ok(event)
    }

    async fn create(&self, data: CreateEventRequest, ctx: &AuthContext) -> Result<Event> {
        let title = require_name("title", &data.title, EVENT_TITLE_MAX_LEN)?;
        validate_event_interval(data.start_time, data.end_time, data.all_day)?;
        let rule = prepare_rule(data.recurrence_rule)?;

        let id = new_v7();
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let calendar_id = match data.calendar_id {
            Some(calendar_id) => {
                ensure_owner::<PgCalendarRepository, _>(&mut *tx, calendar_id, ctx).await?;
                calendar_id
            }
            None => ensure_default_calendar(&mut *tx, &ctx.user_id).await?,
        };

        sqlx::query(
            r#"
            INSERT INTO event (id, user_id, calendar_id, title, description, location,
                               start_time, end_time, all_day, recurrence_rule, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(id)
        .bind(&ctx.user_id)
        .bind(calendar_id)
        .bind(&title)
        .bind(trimmed(data.description))
        .bind(trimmed(data.location))
        .bind(data.start_time)
        .bind(data.end_time)
        .bind(data.all_day)
        .bind(rule)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "create", ctx, 1);
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Event {} missing after insert", id)))
    }

    async fn update(
        &self,
        id: Uuid,
        data: UpdateEventRequest,
        ctx: &AuthContext,
    ) -> Result<Option<Event>> {
        let title = data
            .title
            .as_deref()
            .map(|t| require_name("title", t, EVENT_TITLE_MAX_LEN))
            .transpose()?;
        let rule = data.recurrence_rule.map(prepare_rule).transpose()?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        ensure_owner::<Self, _>(&mut *tx, id, ctx).await?;
        if let Some(calendar_id) = data.calendar_id {
            ensure_owner::<PgCalendarRepository, _>(&mut *tx, calendar_id, ctx).await?;
        }

        // Validate the interval the row will have after the patch.
        let current = sqlx::query(
            "SELECT start_time, end_time, all_day FROM event WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        validate_event_interval(
            data.start_time.unwrap_or_else(|| current.get("start_time")),
            data.end_time.unwrap_or_else(|| current.get("end_time")),
            data.all_day.unwrap_or_else(|| current.get("all_day")),
        )?;

        let mut set = UpdateSet::touching("updated_at", Utc::now());
        set.set_opt("calendar_id", data.calendar_id)
            .set_opt("title", title)
            .set_opt("description", data.description.map(trimmed))
            .set_opt("location", data.location.map(trimmed))
            .set_opt("start_time", data.start_time)
            .set_opt("end_time", data.end_time)
            .set_opt("all_day", data.all_day)
            .set_opt("recurrence_rule", rule);

        let id_param = set.bind_where(id);
        let owner_param = set.bind_where(ctx.user_id.as_str());
        let sql = format!(
            "UPDATE event SET {} WHERE id = {} AND user_id = {}",
            set.assignments_sql(),
            id_param,
            owner_param
        );
        let rows = bind_params!(sqlx::query(&sql), set.into_params())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        tx.commit().await.map_err(Error::Database)?;

        log_mutation(Self::ENTITY, "update", ctx, rows);
        self.fetch(id).await
    }

    async fn delete(&self, id: Uuid, ctx: &AuthContext) -> Result<bool> {
        ensure_owner::<Self, _>(&self.pool, id, ctx).await?;

        let rows = sqlx::query("DELETE FROM event WHERE id = $1 AND user_id = $2")
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
impl EventService for PgEventRepository {
    async fn get_conflicts(
        &self,
        query: ConflictQuery,
        ctx: &AuthContext,
    ) -> Result<Vec<EventConflict>> {
        validate_event_interval(query.start_time, query.end_time, false)?;

        let p = conflict_predicate(&query, ctx);
        let sql = format!(
            "SELECT {} FROM event e WHERE {} ORDER BY e.start_time ASC, e.id",
            EVENT_COLUMNS,
            p.where_sql()
        );
        let rows = bind_params!(sqlx::query(&sql), p.into_params())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let candidates = self
            .enrich(rows.iter().map(map_event_row).collect(), &ctx.user_id)
            .await?;
        let window = TimeInterval::new(query.start_time, query.end_time);
        let conflicts = detect_conflicts(&window, candidates, query.exclude_event_id);

        log_read(Self::ENTITY, "get_conflicts", ctx, conflicts.len());
        Ok(conflicts)
    }
}

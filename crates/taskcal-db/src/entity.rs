//! Shared machinery behind every `EntityService` implementation.
//!
//! A repository describes its table through [`EntityTable`] (entity name, the
//! owner probe, and how its filter becomes a predicate). The free functions here
//! run the ownership probe, the all-or-nothing batch check, and the logging hook
//! the same way for every entity.

use std::collections::HashSet;
use std::str::FromStr;

use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::Row;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use taskcal_core::defaults::BULK_LIMIT;
use taskcal_core::{AuthContext, Error, Result};

use crate::filter::PredicateBuilder;

/// Per-entity description consumed by the generic helpers.
pub trait EntityTable {
    /// Filter accepted by `find_all`.
    type Filter;

    /// Entity name used in errors and as the log component.
    const ENTITY: &'static str;

    /// Query returning the owning user id of row `$1`, or `None` when the
    /// entity is not user-scoped.
    const OWNER_PROBE: Option<&'static str>;

    /// Translate a filter into a predicate. For user-owned entities the owner
    /// restriction is the first clause.
    fn predicate(filter: &Self::Filter, ctx: &AuthContext) -> PredicateBuilder;
}

/// Run the ownership probe for row `id`.
///
/// A missing row and a row owned by somebody else are reported identically.
pub(crate) async fn ensure_owner<'e, T, E>(executor: E, id: Uuid, ctx: &AuthContext) -> Result<()>
where
    T: EntityTable,
    E: PgExecutor<'e>,
{
    let Some(probe) = T::OWNER_PROBE else {
        return Ok(());
    };

    let owner: Option<String> = sqlx::query_scalar(probe)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(Error::Database)?;

    match owner {
        Some(owner) if owner == ctx.user_id => Ok(()),
        _ => {
            warn!(
                subsystem = "db",
                component = T::ENTITY,
                op = "ownership_probe",
                request_id = %ctx.request_id,
                user_id = %ctx.user_id,
                entity_id = %id,
                "Ownership probe rejected"
            );
            Err(Error::unauthorized(
                T::ENTITY,
                format!("{} {} not found or access denied", T::ENTITY, id),
            ))
        }
    }
}

/// Deduplicate a batch of ids and enforce the batch size cap.
pub fn validate_batch(ids: &[Uuid]) -> Result<Vec<Uuid>> {
    if ids.is_empty() {
        return Err(Error::invalid_field("ids", "At least one id is required"));
    }
    if ids.len() > BULK_LIMIT {
        return Err(Error::invalid_field(
            "ids",
            format!(
                "Batch of {} ids exceeds the limit of {}",
                ids.len(),
                BULK_LIMIT
            ),
        ));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
}

/// Verify with one count query that the caller owns every id in the batch.
///
/// `count_sql` must count rows matching `id = ANY($1)` owned by `$2`.
pub(crate) async fn ensure_owns_all<'e, E>(
    executor: E,
    entity: &'static str,
    count_sql: &str,
    ids: &[Uuid],
    ctx: &AuthContext,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let owned: i64 = sqlx::query_scalar(count_sql)
        .bind(ids.to_vec())
        .bind(&ctx.user_id)
        .fetch_one(executor)
        .await
        .map_err(Error::Database)?;

    if owned != ids.len() as i64 {
        warn!(
            subsystem = "db",
            component = entity,
            op = "batch_ownership",
            request_id = %ctx.request_id,
            user_id = %ctx.user_id,
            requested = ids.len(),
            owned,
            "Batch rejected: not every id is owned by the caller"
        );
        return Err(Error::unauthorized(
            entity,
            format!(
                "{} of {} {} ids are missing or not owned by the caller",
                ids.len() as i64 - owned,
                ids.len(),
                entity
            ),
        ));
    }
    Ok(())
}

/// Read a TEXT column holding an enum value.
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column).map_err(Error::Database)?;
    raw.parse().map_err(Error::Internal)
}

/// Turn a unique-index violation into a validation error; other errors pass
/// through as database errors.
pub(crate) fn map_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Error {
    let is_unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if is_unique {
        Error::validation(message)
    } else {
        Error::Database(err)
    }
}

/// Logging hook for completed mutations.
pub(crate) fn log_mutation(entity: &'static str, op: &'static str, ctx: &AuthContext, rows: u64) {
    debug!(
        subsystem = "db",
        component = entity,
        op,
        request_id = %ctx.request_id,
        user_id = %ctx.user_id,
        rows_affected = rows,
        "Mutation applied"
    );
}

/// Logging hook for completed reads.
pub(crate) fn log_read(entity: &'static str, op: &'static str, ctx: &AuthContext, count: usize) {
    trace!(
        subsystem = "db",
        component = entity,
        op,
        request_id = %ctx.request_id,
        user_id = %ctx.user_id,
        result_count = count,
        "Read completed"
    );
}

//! Predicate construction for list queries.
//!
//! Each repository turns its filter type into a [`PredicateBuilder`]: a list of
//! SQL clauses joined with `AND`, plus the positional parameters they reference.
//! For user-owned entities the owner restriction is always pushed first, so
//! `$1` is the caller's user id in every list query.
//!
//! Sort keys never reach SQL verbatim: [`order_by`] maps a requested key through
//! a per-entity allow-list of `(key, sql_expression)` pairs.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskcal_core::defaults::{PAGE_LIMIT, PAGE_LIMIT_MAX, PAGE_OFFSET};
use taskcal_core::validation::escape_like;
use taskcal_core::{Error, Result, SortOrder};

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// Single UUID parameter.
    Uuid(Uuid),
    /// Array of UUIDs (for ANY/ALL operations).
    UuidArray(Vec<Uuid>),
    /// Integer parameter.
    Int(i64),
    /// Timestamp parameter.
    Timestamp(DateTime<Utc>),
    /// Boolean parameter.
    Bool(bool),
    /// String parameter.
    String(String),
    /// Array of strings.
    StringArray(Vec<String>),
    /// String that may be NULL.
    NullableString(Option<String>),
    /// Timestamp that may be NULL.
    NullableTimestamp(Option<DateTime<Utc>>),
}

impl From<Uuid> for QueryParam {
    fn from(v: Uuid) -> Self {
        QueryParam::Uuid(v)
    }
}

impl From<Vec<Uuid>> for QueryParam {
    fn from(v: Vec<Uuid>) -> Self {
        QueryParam::UuidArray(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        QueryParam::Int(v)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(v: DateTime<Utc>) -> Self {
        QueryParam::Timestamp(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        QueryParam::Bool(v)
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        QueryParam::String(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        QueryParam::String(v.to_string())
    }
}

impl From<Vec<String>> for QueryParam {
    fn from(v: Vec<String>) -> Self {
        QueryParam::StringArray(v)
    }
}

impl From<Option<String>> for QueryParam {
    fn from(v: Option<String>) -> Self {
        QueryParam::NullableString(v)
    }
}

impl From<Option<DateTime<Utc>>> for QueryParam {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        QueryParam::NullableTimestamp(v)
    }
}

/// Bind a sequence of [`QueryParam`]s onto an sqlx query, in order.
///
/// Works for `query`, `query_as` and `query_scalar` builders alike.
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for param in $params {
            q = match param {
                $crate::filter::QueryParam::Uuid(v) => q.bind(v),
                $crate::filter::QueryParam::UuidArray(v) => q.bind(v),
                $crate::filter::QueryParam::Int(v) => q.bind(v),
                $crate::filter::QueryParam::Timestamp(v) => q.bind(v),
                $crate::filter::QueryParam::Bool(v) => q.bind(v),
                $crate::filter::QueryParam::String(v) => q.bind(v),
                $crate::filter::QueryParam::StringArray(v) => q.bind(v),
                $crate::filter::QueryParam::NullableString(v) => q.bind(v),
                $crate::filter::QueryParam::NullableTimestamp(v) => q.bind(v),
            };
        }
        q
    }};
}
pub(crate) use bind_params;

/// Accumulates `AND`-joined clauses and their positional parameters.
#[derive(Debug, Clone, Default)]
pub struct PredicateBuilder {
    clauses: Vec<String>,
    params: Vec<QueryParam>,
}

impl PredicateBuilder {
    /// Builder with no restriction (for entities that are not user-owned).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose first clause (and `$1`) restricts `column` to the user.
    pub fn owned_by(column: &str, user_id: &str) -> Self {
        let mut builder = Self::new();
        builder.eq(column, user_id);
        builder
    }

    fn placeholder(&mut self, param: QueryParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// `column = $n`
    pub fn eq(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        let p = self.placeholder(value.into());
        self.clauses.push(format!("{} = {}", column, p));
        self
    }

    /// `column = $n` when a value is present.
    pub fn eq_opt<T: Into<QueryParam>>(&mut self, column: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.eq(column, v);
        }
        self
    }

    /// Inclusive `[from, to]` bounds on a timestamp column.
    pub fn between(
        &mut self,
        column: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> &mut Self {
        if let Some(from) = from {
            let p = self.placeholder(from.into());
            self.clauses.push(format!("{} >= {}", column, p));
        }
        if let Some(to) = to {
            let p = self.placeholder(to.into());
            self.clauses.push(format!("{} <= {}", column, p));
        }
        self
    }

    /// Case-insensitive substring match of one term across several columns.
    /// Blank terms add nothing.
    pub fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        if columns.is_empty() {
            return self;
        }
        let p = self.placeholder(QueryParam::String(format!("%{}%", escape_like(term))));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{} ILIKE {} ESCAPE '\\'", c, p))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        self
    }

    /// Clause with a single parameter; every `{}` in `template` becomes the
    /// parameter's placeholder.
    pub fn with_param(&mut self, template: &str, value: impl Into<QueryParam>) -> &mut Self {
        let p = self.placeholder(value.into());
        self.clauses.push(template.replace("{}", &p));
        self
    }

    /// Parameterless clause.
    pub fn raw(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(clause.to_string());
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// The combined `WHERE` body (`TRUE` when empty).
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "TRUE".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    /// `LIMIT $n OFFSET $m` for the given page, appending both parameters.
    pub fn page_sql(&mut self, limit: i64, offset: i64) -> String {
        let l = self.placeholder(QueryParam::Int(limit));
        let o = self.placeholder(QueryParam::Int(offset));
        format!("LIMIT {} OFFSET {}", l, o)
    }

    pub fn into_params(self) -> Vec<QueryParam> {
        self.params
    }
}

/// Assignments for a partial `UPDATE`, numbered from `$1`.
///
/// `$1` is always the modification timestamp written to the touch column, so
/// templates may refer to it directly.
#[derive(Debug, Clone)]
pub struct UpdateSet {
    assignments: Vec<String>,
    params: Vec<QueryParam>,
}

impl UpdateSet {
    /// Start with `touch_column = $1`.
    pub fn touching(touch_column: &str, now: DateTime<Utc>) -> Self {
        Self {
            assignments: vec![format!("{} = $1", touch_column)],
            params: vec![QueryParam::Timestamp(now)],
        }
    }

    fn placeholder(&mut self, param: QueryParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// `column = $n`
    pub fn set(&mut self, column: &str, value: impl Into<QueryParam>) -> &mut Self {
        let p = self.placeholder(value.into());
        self.assignments.push(format!("{} = {}", column, p));
        self
    }

    /// `column = $n` when a value is present.
    pub fn set_opt<T: Into<QueryParam>>(&mut self, column: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.set(column, v);
        }
        self
    }

    /// `column = <template>`, with every `{}` replaced by the parameter.
    pub fn set_with(
        &mut self,
        column: &str,
        template: &str,
        value: impl Into<QueryParam>,
    ) -> &mut Self {
        let p = self.placeholder(value.into());
        self.assignments
            .push(format!("{} = {}", column, template.replace("{}", &p)));
        self
    }

    /// Number of assignments besides the touch column.
    pub fn field_count(&self) -> usize {
        self.assignments.len() - 1
    }

    /// Append a parameter for the `WHERE` part and return its placeholder.
    pub fn bind_where(&mut self, value: impl Into<QueryParam>) -> String {
        self.placeholder(value.into())
    }

    pub fn assignments_sql(&self) -> String {
        self.assignments.join(", ")
    }

    pub fn into_params(self) -> Vec<QueryParam> {
        self.params
    }
}

/// Resolve a requested sort against an allow-list of `(key, sql_expression)`.
///
/// The result always ends with `tiebreak` so ordering is deterministic.
pub fn order_by(
    allowed: &[(&str, &str)],
    requested: Option<&str>,
    order: Option<SortOrder>,
    default: (&str, SortOrder),
    tiebreak: &str,
) -> Result<String> {
    let key = requested.map(str::trim).unwrap_or(default.0);
    let expr = allowed
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, expr)| *expr)
        .ok_or_else(|| {
            let keys: Vec<&str> = allowed.iter().map(|(k, _)| *k).collect();
            Error::invalid_field(
                "sort_by",
                format!("Cannot sort by '{}'; expected one of: {}", key, keys.join(", ")),
            )
        })?;
    let direction = order.unwrap_or(if requested.is_some() {
        SortOrder::Asc
    } else {
        default.1
    });
    Ok(format!("{} {}, {}", expr, direction.as_sql(), tiebreak))
}

/// Validate pagination, applying the defaults.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> Result<(i64, i64)> {
    let limit = limit.unwrap_or(PAGE_LIMIT);
    if !(1..=PAGE_LIMIT_MAX).contains(&limit) {
        return Err(Error::invalid_field(
            "limit",
            format!("limit must be between 1 and {}", PAGE_LIMIT_MAX),
        ));
    }
    let offset = offset.unwrap_or(PAGE_OFFSET);
    if offset < 0 {
        return Err(Error::invalid_field("offset", "offset cannot be negative"));
    }
    Ok((limit, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SORTS: &[(&str, &str)] = &[("name", "l.name"), ("created_at", "l.created_at")];

    #[test]
    fn test_owner_is_first_parameter() {
        let mut b = PredicateBuilder::owned_by("t.user_id", "alice");
        b.eq("t.completed", false);
        assert_eq!(b.where_sql(), "t.user_id = $1 AND t.completed = $2");
        assert_eq!(b.params()[0], QueryParam::String("alice".to_string()));
    }

    #[test]
    fn test_empty_builder_is_true() {
        assert_eq!(PredicateBuilder::new().where_sql(), "TRUE");
    }

    #[test]
    fn test_eq_opt_skips_none() {
        let mut b = PredicateBuilder::new();
        b.eq_opt::<bool>("a", None).eq_opt("b", Some(true));
        assert_eq!(b.where_sql(), "b = $1");
        assert_eq!(b.param_count(), 1);
    }

    #[test]
    fn test_between_is_inclusive() {
        let now = Utc::now();
        let mut b = PredicateBuilder::owned_by("e.user_id", "u");
        b.between("e.start_time", Some(now), Some(now));
        assert_eq!(
            b.where_sql(),
            "e.user_id = $1 AND e.start_time >= $2 AND e.start_time <= $3"
        );
    }

    #[test]
    fn test_search_reuses_one_parameter_and_escapes() {
        let mut b = PredicateBuilder::new();
        b.search(&["title", "description"], Some(" 50%_off "));
        assert_eq!(
            b.where_sql(),
            "(title ILIKE $1 ESCAPE '\\' OR description ILIKE $1 ESCAPE '\\')"
        );
        assert_eq!(
            b.params(),
            &[QueryParam::String("%50\\%\\_off%".to_string())]
        );
    }

    #[test]
    fn test_blank_search_adds_nothing() {
        let mut b = PredicateBuilder::new();
        b.search(&["title"], Some("   ")).search(&["title"], None);
        assert_eq!(b.where_sql(), "TRUE");
    }

    #[test]
    fn test_with_param_replaces_all_placeholders() {
        let mut b = PredicateBuilder::owned_by("user_id", "u");
        b.with_param(
            "EXISTS (SELECT 1 FROM x WHERE x.a = ANY({}) OR x.b = ANY({}))",
            vec!["a".to_string()],
        );
        assert!(b.where_sql().ends_with("x.a = ANY($2) OR x.b = ANY($2))"));
    }

    #[test]
    fn test_page_sql_continues_numbering() {
        let mut b = PredicateBuilder::owned_by("user_id", "u");
        assert_eq!(b.page_sql(10, 20), "LIMIT $2 OFFSET $3");
        assert_eq!(b.params()[1], QueryParam::Int(10));
    }

    #[test]
    fn test_order_by_default_and_requested() {
        let sql = order_by(SORTS, None, None, ("name", SortOrder::Asc), "l.id").unwrap();
        assert_eq!(sql, "l.name ASC, l.id");

        let sql = order_by(
            SORTS,
            Some("created_at"),
            Some(SortOrder::Desc),
            ("name", SortOrder::Asc),
            "l.id",
        )
        .unwrap();
        assert_eq!(sql, "l.created_at DESC, l.id");
    }

    #[test]
    fn test_order_by_rejects_unknown_key() {
        let err = order_by(
            SORTS,
            Some("name; DROP TABLE task_list"),
            None,
            ("name", SortOrder::Asc),
            "l.id",
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("expected one of: name, created_at"));
    }

    #[test]
    fn test_update_set_numbering() {
        let now = Utc::now();
        let mut set = UpdateSet::touching("updated_at", now);
        set.set("title", "New title")
            .set_opt::<bool>("completed", None)
            .set("description", None::<String>);
        let id = set.bind_where(Uuid::nil());

        assert_eq!(
            set.assignments_sql(),
            "updated_at = $1, title = $2, description = $3"
        );
        assert_eq!(id, "$4");
        assert_eq!(set.field_count(), 2);
        let params = set.into_params();
        assert_eq!(params[2], QueryParam::NullableString(None));
    }

    #[test]
    fn test_update_set_template() {
        let mut set = UpdateSet::touching("updated_at", Utc::now());
        set.set_with(
            "completed_at",
            "CASE WHEN {} THEN COALESCE(completed_at, $1) ELSE NULL END",
            true,
        );
        assert_eq!(
            set.assignments_sql(),
            "updated_at = $1, completed_at = CASE WHEN $2 THEN COALESCE(completed_at, $1) ELSE NULL END"
        );
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(None, None).unwrap(), (PAGE_LIMIT, 0));
        assert!(page(Some(0), None).is_err());
        assert!(page(Some(PAGE_LIMIT_MAX + 1), None).is_err());
        assert!(page(Some(10), Some(-1)).is_err());
    }
}

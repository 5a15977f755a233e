//! Data-store abstraction.
//!
//! Every persistence call is described as an [`Operation`] and executed by a
//! [`Store`]. Concrete stores ([`postgres::PgStore`], [`memory::MemoryStore`])
//! execute operations literally; the stages in [`chain`] wrap a store and
//! rewrite operations on the way through (soft-delete scoping, tombstoning,
//! count augmentation).

pub mod chain;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use service_core::error::AppError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Column holding the tombstone timestamp on every entity.
pub const DELETED_AT: &str = "deleted_at";

/// A stored row as returned by a store.
pub type Row = Map<String, Json>;

/// Column values written by `Create`/`Update` operations.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Account,
    AccountEvent,
}

/// Declares that rows of `entity` reference their parent through `foreign_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRelation {
    pub entity: Entity,
    pub foreign_key: &'static str,
}

const ACCOUNT_COLUMNS: &[&str] = &[
    "id",
    "email",
    "phone",
    "name",
    "first_name",
    "last_name",
    "lead_origin",
    "photo_url",
    "birth_date",
    "provider",
    "provider_aud",
    "provider_account_id",
    "provider_identity_id",
    "is_active",
    "is_email_verified",
    "is_admin",
    "is_moderator",
    "is_provider_anonymous",
    "created_at",
    "updated_at",
    "deleted_at",
];

const ACCOUNT_EVENT_COLUMNS: &[&str] = &[
    "id",
    "account_id",
    "event_type",
    "description",
    "created_at",
    "updated_at",
    "deleted_at",
];

const ACCOUNT_CHILDREN: &[ChildRelation] = &[ChildRelation {
    entity: Entity::AccountEvent,
    foreign_key: "account_id",
}];

impl Entity {
    pub fn name(&self) -> &'static str {
        match self {
            Entity::Account => "Account",
            Entity::AccountEvent => "AccountEvent",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Entity::Account => "accounts",
            Entity::AccountEvent => "account_events",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Entity::Account => ACCOUNT_COLUMNS,
            Entity::AccountEvent => ACCOUNT_EVENT_COLUMNS,
        }
    }

    pub fn unique_columns(&self) -> &'static [&'static str] {
        match self {
            Entity::Account => &["id", "email", "phone"],
            Entity::AccountEvent => &["id"],
        }
    }

    /// Direct children tombstoned together with a row of this entity.
    pub fn children(&self) -> &'static [ChildRelation] {
        match self {
            Entity::Account => ACCOUNT_CHILDREN,
            Entity::AccountEvent => &[],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// JSON form, matching how rows are serialized by both stores.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Text(s) => Json::String(s.clone()),
            Value::Uuid(u) => Json::String(u.to_string()),
            Value::Timestamp(t) => Json::String(t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    IsNull,
    NotNull,
    In(Vec<Value>),
    /// Case-insensitive substring match on text columns.
    Contains(String),
}

impl Condition {
    pub fn matches(&self, value: Option<&Json>) -> bool {
        let value = value.unwrap_or(&Json::Null);
        match self {
            Condition::Eq(expected) => *value == expected.to_json(),
            Condition::IsNull => value.is_null(),
            Condition::NotNull => !value.is_null(),
            Condition::In(candidates) => candidates.iter().any(|c| *value == c.to_json()),
            Condition::Contains(needle) => value
                .as_str()
                .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: String,
    pub condition: Condition,
}

/// Conjunction of column conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let condition = if value.is_null() {
            Condition::IsNull
        } else {
            Condition::Eq(value)
        };
        self.merge(field, condition);
        self
    }

    pub fn is_null(mut self, field: &str) -> Self {
        self.merge(field, Condition::IsNull);
        self
    }

    pub fn not_null(mut self, field: &str) -> Self {
        self.merge(field, Condition::NotNull);
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.merge(field, Condition::In(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn contains(mut self, field: &str, needle: impl Into<String>) -> Self {
        self.merge(field, Condition::Contains(needle.into()));
        self
    }

    /// Adds a clause unless an identical one is already present. Returns
    /// whether the filter changed.
    pub fn merge(&mut self, field: &str, condition: Condition) -> bool {
        if self
            .clauses
            .iter()
            .any(|c| c.field == field && c.condition == condition)
        {
            return false;
        }
        self.clauses.push(Clause {
            field: field.to_string(),
            condition,
        });
        true
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.clauses
            .iter()
            .all(|c| c.condition.matches(row.get(&c.field)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    FindUnique,
    FindUniqueOrFail,
    FindFirst,
    FindFirstOrFail,
    FindMany,
    Count,
    Create,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
}

/// Coarse grouping the chain stages dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Read,
    List,
    Count,
    Delete,
    BulkDelete,
    Write,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::FindUnique
            | Action::FindUniqueOrFail
            | Action::FindFirst
            | Action::FindFirstOrFail => ActionKind::Read,
            Action::FindMany => ActionKind::List,
            Action::Count => ActionKind::Count,
            Action::Delete => ActionKind::Delete,
            Action::DeleteMany => ActionKind::BulkDelete,
            Action::Create | Action::Update | Action::UpdateMany => ActionKind::Write,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self.kind(),
            ActionKind::Read | ActionKind::List | ActionKind::Count
        )
    }

    pub fn fails_when_missing(&self) -> bool {
        matches!(self, Action::FindUniqueOrFail | Action::FindFirstOrFail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub entity: Entity,
    pub action: Action,
    pub filter: Filter,
    pub data: Record,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    /// Reach tombstoned rows and delete physically. Consumed by the chain.
    pub bypass_soft_delete: bool,
}

impl Operation {
    pub fn new(entity: Entity, action: Action) -> Self {
        Self {
            entity,
            action,
            filter: Filter::new(),
            data: Record::new(),
            order_by: Vec::new(),
            skip: None,
            take: None,
            bypass_soft_delete: false,
        }
    }

    pub fn find_unique(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::FindUnique).with_filter(filter)
    }

    pub fn find_unique_or_fail(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::FindUniqueOrFail).with_filter(filter)
    }

    pub fn find_first(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::FindFirst).with_filter(filter)
    }

    pub fn find_many(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::FindMany).with_filter(filter)
    }

    pub fn count(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::Count).with_filter(filter)
    }

    pub fn create(entity: Entity, data: Record) -> Self {
        Self::new(entity, Action::Create).with_data(data)
    }

    pub fn update(entity: Entity, filter: Filter, data: Record) -> Self {
        Self::new(entity, Action::Update)
            .with_filter(filter)
            .with_data(data)
    }

    pub fn update_many(entity: Entity, filter: Filter, data: Record) -> Self {
        Self::new(entity, Action::UpdateMany)
            .with_filter(filter)
            .with_data(data)
    }

    pub fn delete(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::Delete).with_filter(filter)
    }

    pub fn delete_many(entity: Entity, filter: Filter) -> Self {
        Self::new(entity, Action::DeleteMany).with_filter(filter)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_data(mut self, data: Record) -> Self {
        self.data = data;
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn paginate(mut self, skip: u64, take: u64) -> Self {
        self.skip = Some(skip);
        self.take = Some(take);
        self
    }

    /// Opts this operation out of soft-delete handling.
    pub fn including_deleted(mut self) -> Self {
        self.bypass_soft_delete = true;
        self
    }

    /// Rejects column names the entity does not declare.
    pub fn validate(&self) -> Result<(), StoreError> {
        let unknown = self
            .filter
            .clauses()
            .iter()
            .map(|c| c.field.as_str())
            .chain(self.data.keys().map(String::as_str))
            .chain(self.order_by.iter().map(|o| o.field.as_str()))
            .find(|field| !self.entity.has_column(field));

        match unknown {
            Some(field) => Err(StoreError::InvalidOperation(format!(
                "unknown column '{}' for {}",
                field, self.entity
            ))),
            None => Ok(()),
        }
    }
}

/// A page of rows plus the total number of rows matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub count: u64,
}

impl<T> Page<T> {
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            data: self.data.into_iter().map(f).collect::<Result<_, _>>()?,
            count: self.count,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Record(Option<Row>),
    Rows(Vec<Row>),
    Page(Page<Row>),
    Affected(u64),
    Count(u64),
}

impl Outcome {
    fn kind(&self) -> &'static str {
        match self {
            Outcome::Record(_) => "record",
            Outcome::Rows(_) => "rows",
            Outcome::Page(_) => "page",
            Outcome::Affected(_) => "affected",
            Outcome::Count(_) => "count",
        }
    }

    fn unexpected(self, expected: &str) -> StoreError {
        StoreError::InvalidOperation(format!(
            "expected {} outcome, got {}",
            expected,
            self.kind()
        ))
    }

    pub fn into_record(self) -> Result<Option<Row>, StoreError> {
        match self {
            Outcome::Record(row) => Ok(row),
            other => Err(other.unexpected("record")),
        }
    }

    pub fn into_rows(self) -> Result<Vec<Row>, StoreError> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Page(page) => Ok(page.data),
            other => Err(other.unexpected("rows")),
        }
    }

    pub fn into_page(self) -> Result<Page<Row>, StoreError> {
        match self {
            Outcome::Page(page) => Ok(page),
            other => Err(other.unexpected("page")),
        }
    }

    pub fn into_count(self) -> Result<u64, StoreError> {
        match self {
            Outcome::Count(n) | Outcome::Affected(n) => Ok(n),
            other => Err(other.unexpected("count")),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {entity} ({})", .fields.join(", "))]
    UniqueViolation { entity: Entity, fields: Vec<String> },

    #[error("record not found for {entity}")]
    RecordNotFound { entity: Entity },

    #[error("store call timed out")]
    Timeout,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { fields, .. } => AppError::Conflict(anyhow::anyhow!(
                "The value for field(s) {} is already in use",
                fields.join(", ")
            )),
            StoreError::RecordNotFound { entity } => {
                AppError::NotFound(anyhow::anyhow!("Record not found for {} entity", entity))
            }
            StoreError::InvalidOperation(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
            StoreError::Timeout => AppError::DatabaseError(anyhow::anyhow!("store call timed out")),
            StoreError::Backend(err) => AppError::DatabaseError(err),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError>;

    /// Executes every operation or none of them.
    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError> {
        (**self).execute(op).await
    }

    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        (**self).execute_atomic(ops).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        (**self).health_check().await
    }
}

pub fn row_id(row: &Row) -> Result<Uuid, StoreError> {
    row.get("id")
        .and_then(Json::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::InvalidOperation("row without a uuid id".to_string()))
}

pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Json::Object(row))
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("failed to decode row: {}", e)))
}

/// Total order used for in-memory sorting: nulls first, then by JSON type.
pub(crate) fn compare_json(a: &Json, b: &Json) -> Ordering {
    match (a, b) {
        (Json::Null, Json::Null) => Ordering::Equal,
        (Json::Null, _) => Ordering::Less,
        (_, Json::Null) => Ordering::Greater,
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Number(x), Json::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Json::String(x), Json::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, QueryBuilder};
use std::future::Future;
use std::time::Duration;

use super::{
    Action, Condition, Entity, Filter, Operation, Outcome, Row, Store, StoreError, Value,
};

/// PostgreSQL-backed store. Rows come back as `to_jsonb(row)` so both stores
/// hand the same shape to repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

#[async_trait]
impl Store for PgStore {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError> {
        op.validate()?;
        self.bounded(async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx(op.entity))?;
            run(&op, &mut *conn).await
        })
        .await
    }

    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        for op in &ops {
            op.validate()?;
        }
        self.bounded(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx(Entity::Account))?;
            let mut outcomes = Vec::with_capacity(ops.len());
            for op in &ops {
                outcomes.push(run(op, &mut *tx).await?);
            }
            tx.commit().await.map_err(map_sqlx(Entity::Account))?;
            Ok(outcomes)
        })
        .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.bounded(async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx(Entity::Account))?;
            Ok(())
        })
        .await
    }
}

async fn run(op: &Operation, conn: &mut PgConnection) -> Result<Outcome, StoreError> {
    let entity = op.entity;
    let table = entity.table();
    let map_err = map_sqlx(entity);

    match op.action {
        Action::FindUnique
        | Action::FindUniqueOrFail
        | Action::FindFirst
        | Action::FindFirstOrFail => {
            let mut qb = select(op, Some(1));
            let row: Option<Json> = qb
                .build_query_scalar()
                .fetch_optional(&mut *conn)
                .await
                .map_err(&map_err)?;
            let row = row.map(into_row).transpose()?;
            if row.is_none() && op.action.fails_when_missing() {
                return Err(StoreError::RecordNotFound { entity });
            }
            Ok(Outcome::Record(row))
        }
        Action::FindMany => {
            let mut qb = select(op, op.take);
            let rows: Vec<Json> = qb
                .build_query_scalar()
                .fetch_all(&mut *conn)
                .await
                .map_err(&map_err)?;
            Ok(Outcome::Rows(
                rows.into_iter().map(into_row).collect::<Result<_, _>>()?,
            ))
        }
        Action::Count => {
            let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {} AS t", table));
            push_where(&mut qb, &op.filter);
            let count: i64 = qb
                .build_query_scalar()
                .fetch_one(&mut *conn)
                .await
                .map_err(&map_err)?;
            Ok(Outcome::Count(count.max(0) as u64))
        }
        Action::Create => {
            if op.data.is_empty() {
                return Err(StoreError::InvalidOperation(format!(
                    "create on {} without data",
                    entity
                )));
            }
            let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} AS t (", table));
            let mut columns = qb.separated(", ");
            for column in op.data.keys() {
                columns.push(column);
            }
            qb.push(") VALUES (");
            for (i, value) in op.data.values().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_value(&mut qb, value);
            }
            qb.push(") RETURNING to_jsonb(t)");

            let row: Json = qb
                .build_query_scalar()
                .fetch_one(&mut *conn)
                .await
                .map_err(&map_err)?;
            Ok(Outcome::Record(Some(into_row(row)?)))
        }
        Action::Update => {
            let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} AS t", table));
            push_set(&mut qb, op)?;
            qb.push(format!(" WHERE t.id = (SELECT id FROM {}", table));
            push_where(&mut qb, &op.filter);
            qb.push(" LIMIT 1) RETURNING to_jsonb(t)");

            let row: Option<Json> = qb
                .build_query_scalar()
                .fetch_optional(&mut *conn)
                .await
                .map_err(&map_err)?;
            match row {
                Some(row) => Ok(Outcome::Record(Some(into_row(row)?))),
                None => Err(StoreError::RecordNotFound { entity }),
            }
        }
        Action::UpdateMany => {
            let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} AS t", table));
            push_set(&mut qb, op)?;
            push_where(&mut qb, &op.filter);
            let result = qb.build().execute(&mut *conn).await.map_err(&map_err)?;
            Ok(Outcome::Affected(result.rows_affected()))
        }
        Action::Delete => {
            let mut qb = QueryBuilder::<Postgres>::new(format!(
                "DELETE FROM {} AS t WHERE t.id = (SELECT id FROM {}",
                table, table
            ));
            push_where(&mut qb, &op.filter);
            qb.push(" LIMIT 1) RETURNING to_jsonb(t)");

            let row: Option<Json> = qb
                .build_query_scalar()
                .fetch_optional(&mut *conn)
                .await
                .map_err(&map_err)?;
            match row {
                Some(row) => Ok(Outcome::Record(Some(into_row(row)?))),
                None => Err(StoreError::RecordNotFound { entity }),
            }
        }
        Action::DeleteMany => {
            let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} AS t", table));
            push_where(&mut qb, &op.filter);
            let result = qb.build().execute(&mut *conn).await.map_err(&map_err)?;
            Ok(Outcome::Affected(result.rows_affected()))
        }
    }
}

fn select(op: &Operation, limit: Option<u64>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT to_jsonb(t) FROM {} AS t", op.entity.table()));
    push_where(&mut qb, &op.filter);

    if !op.order_by.is_empty() {
        qb.push(" ORDER BY ");
        for (i, order) in op.order_by.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(&order.field).push(" ").push(order.direction.as_sql());
        }
    }
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(sql_bound(limit));
    }
    if let Some(skip) = op.skip {
        qb.push(" OFFSET ").push_bind(sql_bound(skip));
    }
    qb
}

/// LIMIT/OFFSET bind value; Postgres takes a BIGINT, so larger counts saturate.
fn sql_bound(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn push_set(qb: &mut QueryBuilder<'static, Postgres>, op: &Operation) -> Result<(), StoreError> {
    if op.data.is_empty() {
        return Err(StoreError::InvalidOperation(format!(
            "update on {} without data",
            op.entity
        )));
    }
    qb.push(" SET ");
    for (i, (column, value)) in op.data.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(column).push(" = ");
        push_value(qb, value);
    }
    Ok(())
}

fn push_where(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    if filter.is_empty() {
        return;
    }
    qb.push(" WHERE ");
    for (i, clause) in filter.clauses().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        match &clause.condition {
            Condition::Eq(value) => {
                qb.push(&clause.field).push(" = ");
                push_value(qb, value);
            }
            Condition::IsNull => {
                qb.push(&clause.field).push(" IS NULL");
            }
            Condition::NotNull => {
                qb.push(&clause.field).push(" IS NOT NULL");
            }
            Condition::In(values) if values.is_empty() => {
                qb.push("FALSE");
            }
            Condition::In(values) => {
                qb.push(&clause.field).push(" IN (");
                for (j, value) in values.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, value);
                }
                qb.push(")");
            }
            Condition::Contains(needle) => {
                qb.push(&clause.field)
                    .push(" ILIKE '%' || ")
                    .push_bind(escape_like(needle))
                    .push(" || '%'");
            }
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        Value::Null => qb.push("NULL"),
        Value::Bool(b) => qb.push_bind(*b),
        Value::Int(i) => qb.push_bind(*i),
        Value::Text(s) => qb.push_bind(s.clone()),
        Value::Uuid(u) => qb.push_bind(*u),
        Value::Timestamp(t) => qb.push_bind(*t),
    };
}

fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn into_row(value: Json) -> Result<Row, StoreError> {
    match value {
        Json::Object(map) => Ok(map),
        other => Err(StoreError::Backend(anyhow::anyhow!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}

/// Maps driver errors, recognising unique violations (SQLSTATE 23505).
fn map_sqlx(entity: Entity) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            let field = db
                .constraint()
                .map(|c| constraint_field(entity, c))
                .unwrap_or_else(|| "unknown".to_string());
            StoreError::UniqueViolation {
                entity,
                fields: vec![field],
            }
        }
        sqlx::Error::RowNotFound => StoreError::RecordNotFound { entity },
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        other => StoreError::Backend(anyhow::Error::new(other)),
    }
}

/// `accounts_email_key` -> `email`
fn constraint_field(entity: Entity, constraint: &str) -> String {
    let prefix = format!("{}_", entity.table());
    constraint
        .strip_prefix(&prefix)
        .unwrap_or(constraint)
        .trim_end_matches("_key")
        .to_string()
}

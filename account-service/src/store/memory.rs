use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    compare_json, Action, Entity, Filter, Operation, Outcome, Row, SortDirection, Store, StoreError,
    Value,
};

type Tables = HashMap<Entity, Vec<Row>>;

/// In-process store with the same observable semantics as the PostgreSQL
/// store: unique columns, ordering, pagination, atomic batches and physical
/// cascade on delete. Every executed operation is appended to a journal.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    journal: Mutex<Vec<Operation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations received so far, in arrival order.
    pub fn journal(&self) -> Vec<Operation> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.clear();
        }
    }

    /// Every stored row of `entity`, tombstoned ones included.
    pub fn raw_rows(&self, entity: Entity) -> Vec<Row> {
        self.tables
            .lock()
            .map(|t| t.get(&entity).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock_tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn log(&self, ops: &[Operation]) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.extend(ops.iter().cloned());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError> {
        self.log(std::slice::from_ref(&op));
        let mut tables = self.lock_tables()?;
        apply(&mut tables, &op)
    }

    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        self.log(&ops);
        let mut tables = self.lock_tables()?;
        let mut staged = tables.clone();
        let outcomes = ops
            .iter()
            .map(|op| apply(&mut staged, op))
            .collect::<Result<Vec<_>, _>>()?;
        *tables = staged;
        Ok(outcomes)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock_tables().map(|_| ())
    }
}

fn apply(tables: &mut Tables, op: &Operation) -> Result<Outcome, StoreError> {
    op.validate()?;
    let entity = op.entity;

    match op.action {
        Action::FindUnique | Action::FindFirst => {
            Ok(Outcome::Record(select(tables, op).into_iter().next()))
        }
        Action::FindUniqueOrFail | Action::FindFirstOrFail => select(tables, op)
            .into_iter()
            .next()
            .map(|row| Outcome::Record(Some(row)))
            .ok_or(StoreError::RecordNotFound { entity }),
        Action::FindMany => Ok(Outcome::Rows(select(tables, op))),
        Action::Count => Ok(Outcome::Count(
            rows(tables, entity)
                .iter()
                .filter(|r| op.filter.matches(r))
                .count() as u64,
        )),
        Action::Create => insert(tables, op).map(|row| Outcome::Record(Some(row))),
        Action::Update => {
            let position = rows(tables, entity)
                .iter()
                .position(|r| op.filter.matches(r))
                .ok_or(StoreError::RecordNotFound { entity })?;
            let row = update_at(tables, op, position)?;
            Ok(Outcome::Record(Some(row)))
        }
        Action::UpdateMany => {
            let positions: Vec<usize> = rows(tables, entity)
                .iter()
                .enumerate()
                .filter(|(_, r)| op.filter.matches(r))
                .map(|(i, _)| i)
                .collect();
            for &position in &positions {
                update_at(tables, op, position)?;
            }
            Ok(Outcome::Affected(positions.len() as u64))
        }
        Action::Delete => {
            let row = rows(tables, entity)
                .iter()
                .find(|r| op.filter.matches(r))
                .cloned()
                .ok_or(StoreError::RecordNotFound { entity })?;
            remove_cascade(tables, entity, &Filter::new().eq("id", id_value(&row)));
            Ok(Outcome::Record(Some(row)))
        }
        Action::DeleteMany => Ok(Outcome::Affected(remove_cascade(
            tables, entity, &op.filter,
        ))),
    }
}

fn rows(tables: &Tables, entity: Entity) -> &[Row] {
    tables.get(&entity).map(Vec::as_slice).unwrap_or(&[])
}

fn select(tables: &Tables, op: &Operation) -> Vec<Row> {
    let mut matched: Vec<Row> = rows(tables, op.entity)
        .iter()
        .filter(|r| op.filter.matches(r))
        .cloned()
        .collect();

    if !op.order_by.is_empty() {
        matched.sort_by(|a, b| {
            op.order_by
                .iter()
                .map(|o| {
                    let ordering = compare_json(
                        a.get(&o.field).unwrap_or(&Json::Null),
                        b.get(&o.field).unwrap_or(&Json::Null),
                    );
                    match o.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let skip = op.skip.unwrap_or(0) as usize;
    let take = op.take.map(|t| t as usize).unwrap_or(usize::MAX);
    matched.into_iter().skip(skip).take(take).collect()
}

fn insert(tables: &mut Tables, op: &Operation) -> Result<Row, StoreError> {
    let entity = op.entity;
    let now = Value::Timestamp(Utc::now()).to_json();

    let mut row = Row::new();
    for column in entity.columns() {
        let value = op
            .data
            .get(*column)
            .map(Value::to_json)
            .unwrap_or(Json::Null);
        row.insert(column.to_string(), value);
    }
    if row.get("id").map_or(true, Json::is_null) {
        row.insert("id".to_string(), Value::Uuid(Uuid::new_v4()).to_json());
    }
    for column in ["created_at", "updated_at"] {
        if row.get(column).map_or(true, Json::is_null) {
            row.insert(column.to_string(), now.clone());
        }
    }

    check_unique(tables, entity, &row, None)?;
    tables.entry(entity).or_default().push(row.clone());
    Ok(row)
}

fn update_at(tables: &mut Tables, op: &Operation, position: usize) -> Result<Row, StoreError> {
    let entity = op.entity;
    let mut updated = rows(tables, entity)[position].clone();
    for (column, value) in &op.data {
        updated.insert(column.clone(), value.to_json());
    }

    check_unique(tables, entity, &updated, Some(position))?;
    let table = tables.entry(entity).or_default();
    table[position] = updated.clone();
    Ok(updated)
}

fn check_unique(
    tables: &Tables,
    entity: Entity,
    candidate: &Row,
    skip_position: Option<usize>,
) -> Result<(), StoreError> {
    let existing = rows(tables, entity);
    let fields: Vec<String> = entity
        .unique_columns()
        .iter()
        .filter(|column| {
            let value = candidate.get(**column).unwrap_or(&Json::Null);
            !value.is_null()
                && existing
                    .iter()
                    .enumerate()
                    .any(|(i, r)| Some(i) != skip_position && r.get(**column) == Some(value))
        })
        .map(|c| c.to_string())
        .collect();

    if fields.is_empty() {
        Ok(())
    } else {
        Err(StoreError::UniqueViolation { entity, fields })
    }
}

fn id_value(row: &Row) -> Value {
    match row.get("id") {
        Some(Json::String(s)) => Uuid::parse_str(s)
            .map(Value::Uuid)
            .unwrap_or_else(|_| Value::Text(s.clone())),
        _ => Value::Null,
    }
}

/// Physically removes matching rows and, recursively, rows referencing them.
fn remove_cascade(tables: &mut Tables, entity: Entity, filter: &Filter) -> u64 {
    let table = tables.entry(entity).or_default();
    let (removed, kept): (Vec<Row>, Vec<Row>) =
        std::mem::take(table).into_iter().partition(|r| filter.matches(r));
    *table = kept;

    if removed.is_empty() {
        return 0;
    }

    let ids: Vec<Value> = removed.iter().map(id_value).collect();
    for relation in entity.children() {
        let child_filter = Filter::new().is_in(relation.foreign_key, ids.clone());
        remove_cascade(tables, relation.entity, &child_filter);
    }
    removed.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Record;

    fn account(email: &str, name: &str) -> Record {
        let mut data = Record::new();
        data.insert("email".to_string(), Value::from(email));
        data.insert("name".to_string(), Value::from(name));
        data.insert("is_active".to_string(), Value::from(true));
        data
    }

    #[tokio::test]
    async fn rejects_duplicate_unique_columns() {
        let store = MemoryStore::new();
        store
            .execute(Operation::create(Entity::Account, account("a@x.io", "A")))
            .await
            .unwrap();

        let err = store
            .execute(Operation::create(Entity::Account, account("a@x.io", "B")))
            .await
            .unwrap_err();

        match err {
            StoreError::UniqueViolation { fields, .. } => assert_eq!(fields, vec!["email"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sorts_and_paginates() {
        let store = MemoryStore::new();
        for name in ["carol", "alice", "bob"] {
            store
                .execute(Operation::create(
                    Entity::Account,
                    account(&format!("{name}@x.io"), name),
                ))
                .await
                .unwrap();
        }

        let rows = store
            .execute(
                Operation::find_many(Entity::Account, Filter::new())
                    .order_by("name", SortDirection::Asc)
                    .paginate(1, 1),
            )
            .await
            .unwrap()
            .into_rows()
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "bob");
    }

    #[tokio::test]
    async fn failed_batch_leaves_tables_untouched() {
        let store = MemoryStore::new();
        store
            .execute(Operation::create(Entity::Account, account("a@x.io", "A")))
            .await
            .unwrap();

        let result = store
            .execute_atomic(vec![
                Operation::create(Entity::Account, account("b@x.io", "B")),
                Operation::create(Entity::Account, account("a@x.io", "dup")),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.raw_rows(Entity::Account).len(), 1);
    }

    #[tokio::test]
    async fn physical_delete_cascades_to_children() {
        let store = MemoryStore::new();
        let parent = store
            .execute(Operation::create(Entity::Account, account("a@x.io", "A")))
            .await
            .unwrap()
            .into_record()
            .unwrap()
            .unwrap();
        let parent_id = id_value(&parent);

        let mut event = Record::new();
        event.insert("account_id".to_string(), parent_id.clone());
        event.insert("event_type".to_string(), Value::from("LOGIN"));
        store
            .execute(Operation::create(Entity::AccountEvent, event))
            .await
            .unwrap();

        store
            .execute(Operation::delete(
                Entity::Account,
                Filter::new().eq("id", parent_id),
            ))
            .await
            .unwrap();

        assert!(store.raw_rows(Entity::Account).is_empty());
        assert!(store.raw_rows(Entity::AccountEvent).is_empty());
    }
}

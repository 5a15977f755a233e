use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::{
    row_id, ActionKind, Entity, Filter, Operation, Outcome, Record, Store, StoreError, Value,
    DELETED_AT,
};

/// Rewrites deletes into tombstoning updates that also tombstone the direct
/// children of every affected row, in one atomic batch.
pub struct TombstoneDeletes<S> {
    inner: S,
}

impl<S> TombstoneDeletes<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn tombstone(now: DateTime<Utc>) -> Record {
    Record::from([(DELETED_AT.to_string(), Value::Timestamp(now))])
}

/// Tombstones the live direct children of the given parents.
fn child_tombstones(entity: Entity, ids: &[Uuid], now: DateTime<Utc>) -> Vec<Operation> {
    entity
        .children()
        .iter()
        .map(|relation| {
            Operation::update_many(
                relation.entity,
                Filter::new()
                    .is_in(relation.foreign_key, ids.iter().copied())
                    .is_null(DELETED_AT),
                tombstone(now),
            )
        })
        .collect()
}

impl<S: Store> TombstoneDeletes<S> {
    async fn tombstone_one(&self, op: Operation) -> Result<Outcome, StoreError> {
        let entity = op.entity;
        let target = self
            .inner
            .execute(Operation::find_first(entity, op.filter))
            .await?
            .into_record()?
            .ok_or(StoreError::RecordNotFound { entity })?;
        let id = row_id(&target)?;
        let now = Utc::now();

        let mut batch = vec![Operation::update(
            entity,
            Filter::new().eq("id", id).is_null(DELETED_AT),
            tombstone(now),
        )];
        batch.extend(child_tombstones(entity, &[id], now));

        let outcomes = self.inner.execute_atomic(batch).await?;
        tracing::debug!(
            entity = %entity,
            id = %id,
            cascaded = outcomes.len() - 1,
            "Tombstoned record"
        );

        outcomes
            .into_iter()
            .next()
            .ok_or(StoreError::RecordNotFound { entity })
    }

    async fn tombstone_many(&self, op: Operation) -> Result<Outcome, StoreError> {
        let entity = op.entity;
        let ids = self
            .inner
            .execute(Operation::find_many(entity, op.filter))
            .await?
            .into_rows()?
            .iter()
            .map(row_id)
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(Outcome::Affected(0));
        }

        let now = Utc::now();
        let mut batch = vec![Operation::update_many(
            entity,
            Filter::new()
                .is_in("id", ids.iter().copied())
                .is_null(DELETED_AT),
            tombstone(now),
        )];
        batch.extend(child_tombstones(entity, &ids, now));
        let outcomes = self.inner.execute_atomic(batch).await?;
        tracing::debug!(entity = %entity, count = ids.len(), "Tombstoned records");

        outcomes
            .into_iter()
            .next()
            .ok_or(StoreError::RecordNotFound { entity })
    }
}

#[async_trait]
impl<S: Store> Store for TombstoneDeletes<S> {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError> {
        if op.bypass_soft_delete {
            return self.inner.execute(op).await;
        }
        match op.action.kind() {
            ActionKind::Delete => self.tombstone_one(op).await,
            ActionKind::BulkDelete => self.tombstone_many(op).await,
            _ => self.inner.execute(op).await,
        }
    }

    /// Deletes must be issued on their own so their targets can be resolved
    /// before the batch starts.
    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        let has_delete = ops.iter().any(|op| {
            !op.bypass_soft_delete
                && matches!(op.action.kind(), ActionKind::Delete | ActionKind::BulkDelete)
        });
        if has_delete {
            return Err(StoreError::InvalidOperation(
                "soft deletes cannot be part of an atomic batch".to_string(),
            ));
        }
        self.inner.execute_atomic(ops).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

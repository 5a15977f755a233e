use async_trait::async_trait;

use crate::store::{Condition, Operation, Outcome, Store, StoreError, DELETED_AT};

/// Restricts reads to rows whose tombstone is unset and consumes the bypass
/// flag so the store below never sees it.
pub struct SoftDeleteFilter<S> {
    inner: S,
}

impl<S> SoftDeleteFilter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

/// Applying this twice leaves the operation as applying it once.
pub fn scope_to_live_records(op: &mut Operation) {
    if op.action.is_read() && !op.bypass_soft_delete {
        op.filter.merge(DELETED_AT, Condition::IsNull);
    }
    op.bypass_soft_delete = false;
}

#[async_trait]
impl<S: Store> Store for SoftDeleteFilter<S> {
    async fn execute(&self, mut op: Operation) -> Result<Outcome, StoreError> {
        scope_to_live_records(&mut op);
        self.inner.execute(op).await
    }

    async fn execute_atomic(&self, mut ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        ops.iter_mut().for_each(scope_to_live_records);
        self.inner.execute_atomic(ops).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

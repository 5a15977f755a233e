use async_trait::async_trait;

use crate::store::{Action, Operation, Outcome, Page, Record, Store, StoreError};

/// Turns `FindMany` results into `{data, count}`, counting every matching row
/// regardless of pagination.
pub struct CountAugment<S> {
    inner: S,
}

impl<S> CountAugment<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: Store> Store for CountAugment<S> {
    async fn execute(&self, op: Operation) -> Result<Outcome, StoreError> {
        if op.action != Action::FindMany {
            return self.inner.execute(op).await;
        }

        let count_op = Operation {
            action: Action::Count,
            data: Record::new(),
            order_by: Vec::new(),
            skip: None,
            take: None,
            ..op.clone()
        };

        let (rows, count) =
            tokio::try_join!(self.inner.execute(op), self.inner.execute(count_op))?;

        Ok(Outcome::Page(Page {
            data: rows.into_rows()?,
            count: count.into_count()?,
        }))
    }

    async fn execute_atomic(&self, ops: Vec<Operation>) -> Result<Vec<Outcome>, StoreError> {
        self.inner.execute_atomic(ops).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

//! Typed access to stored models through the persistence chain.

pub mod account;

use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Account, AccountEvent, StoredModel};
use crate::store::{
    decode, Filter, OrderBy, Operation, Page, Record, SortDirection, Store, StoreError, DELETED_AT,
};

pub type AccountRepository = Repository<Account>;
pub type AccountEventRepository = Repository<AccountEvent>;

/// Filter, order and window of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub skip: u64,
    pub take: u64,
}

impl ListQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            take: 10,
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn paginate(mut self, skip: u64, take: u64) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }
}

pub struct Repository<T> {
    store: Arc<dyn Store>,
    _model: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _model: PhantomData,
        }
    }
}

impl<T: StoredModel> Repository<T> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            _model: PhantomData,
        }
    }

    pub async fn create(&self, model: &T) -> Result<T, StoreError> {
        let row = self
            .store
            .execute(Operation::create(T::ENTITY, model.to_record()))
            .await?
            .into_record()?
            .ok_or(StoreError::RecordNotFound { entity: T::ENTITY })?;
        decode(row)
    }

    pub async fn find_unique(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        self.store
            .execute(Operation::find_unique(T::ENTITY, Filter::new().eq("id", id)))
            .await?
            .into_record()?
            .map(decode)
            .transpose()
    }

    pub async fn find_first(&self, filter: Filter) -> Result<Option<T>, StoreError> {
        self.store
            .execute(Operation::find_first(T::ENTITY, filter))
            .await?
            .into_record()?
            .map(decode)
            .transpose()
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<T, StoreError> {
        let row = self
            .store
            .execute(Operation::find_unique_or_fail(
                T::ENTITY,
                Filter::new().eq("id", id),
            ))
            .await?
            .into_record()?
            .ok_or(StoreError::RecordNotFound { entity: T::ENTITY })?;
        decode(row)
    }

    pub async fn find_many(&self, query: ListQuery) -> Result<Page<T>, StoreError> {
        let mut op = Operation::find_many(T::ENTITY, query.filter).paginate(query.skip, query.take);
        op.order_by = query.order_by;

        self.store.execute(op).await?.into_page()?.try_map(decode)
    }

    /// Counts matching rows; `including_deleted` also counts tombstoned ones.
    pub async fn count(&self, filter: Filter, including_deleted: bool) -> Result<u64, StoreError> {
        let mut op = Operation::count(T::ENTITY, filter);
        op.bypass_soft_delete = including_deleted;
        self.store.execute(op).await?.into_count()
    }

    /// Updates a live record. Tombstoned records report not found.
    pub async fn update(&self, id: Uuid, changes: Record) -> Result<T, StoreError> {
        let row = self
            .store
            .execute(Operation::update(
                T::ENTITY,
                Filter::new().eq("id", id).is_null(DELETED_AT),
                changes,
            ))
            .await?
            .into_record()?
            .ok_or(StoreError::RecordNotFound { entity: T::ENTITY })?;
        decode(row)
    }

    /// Soft-deletes a record and its children, returning the tombstoned record.
    pub async fn delete(&self, id: Uuid) -> Result<T, StoreError> {
        let row = self
            .store
            .execute(Operation::delete(T::ENTITY, Filter::new().eq("id", id)))
            .await?
            .into_record()?
            .ok_or(StoreError::RecordNotFound { entity: T::ENTITY })?;
        decode(row)
    }
}

//! Persistence middleware chain.
//!
//! Stages wrap the store they delegate to, so the outermost stage sees an
//! operation first:
//!
//! `CountAugment` -> `TombstoneDeletes` -> `SoftDeleteFilter` -> base store
//!
//! Deletes are rewritten into tombstones before the soft-delete scoping runs,
//! which lets the tombstone stage resolve its targets through the scoped
//! reads. Listing results are augmented last, after every rewrite.

mod count;
mod soft_delete;
mod tombstone;

pub use count::CountAugment;
pub use soft_delete::{scope_to_live_records, SoftDeleteFilter};
pub use tombstone::TombstoneDeletes;

use super::Store;

pub type PersistenceChain<S> = CountAugment<TombstoneDeletes<SoftDeleteFilter<S>>>;

/// Wraps a concrete store with every stage, in order.
pub fn persistence_chain<S: Store>(store: S) -> PersistenceChain<S> {
    CountAugment::new(TombstoneDeletes::new(SoftDeleteFilter::new(store)))
}

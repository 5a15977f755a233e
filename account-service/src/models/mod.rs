pub mod account;
pub mod account_event;
pub mod identity;

pub use account::{split_display_name, Account, Role};
pub use account_event::{AccountEvent, EventType};
pub use identity::{Identity, ProviderSession, ProviderUser, VerifiedToken};

use crate::store::{Entity, Record};
use serde::de::DeserializeOwned;

/// A model persisted through the store.
pub trait StoredModel: DeserializeOwned + Send + Sync + 'static {
    const ENTITY: Entity;

    fn to_record(&self) -> Record;
}

//! Resolves the stored account behind an authenticated identity.

use crate::models::{Account, Identity};
use crate::repositories::AccountRepository;
use crate::store::StoreError;

#[derive(Clone)]
pub struct AccountDirectory {
    accounts: AccountRepository,
}

impl AccountDirectory {
    pub fn new(accounts: AccountRepository) -> Self {
        Self { accounts }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.accounts.find_by_email(email).await
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<Account>, StoreError> {
        self.accounts.find_by_phone(phone).await
    }

    pub async fn find_by_provider_id(&self, subject_id: &str) -> Result<Option<Account>, StoreError> {
        self.accounts.find_by_provider_account_id(subject_id).await
    }

    /// Looks the account up by email, then phone, then provider subject id.
    /// The first hit wins; tombstoned accounts are never returned.
    pub async fn find_account_for_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<Account>, StoreError> {
        if let Some(email) = identity.email.as_deref().filter(|e| !e.is_empty()) {
            if let Some(account) = self.accounts.find_by_email(email).await? {
                return Ok(Some(account));
            }
        }

        if let Some(phone) = identity.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some(account) = self.accounts.find_by_phone(phone).await? {
                return Ok(Some(account));
            }
        }

        if identity.provider_subject_id.is_empty() {
            return Ok(None);
        }
        self.accounts
            .find_by_provider_account_id(&identity.provider_subject_id)
            .await
    }
}

use super::AccountRepository;
use crate::models::Account;
use crate::store::{Filter, StoreError};

impl AccountRepository {
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.find_first(Filter::new().eq("email", email)).await
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Option<Account>, StoreError> {
        self.find_first(Filter::new().eq("phone", phone)).await
    }

    pub async fn find_by_provider_account_id(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.find_first(Filter::new().eq("provider_account_id", provider_account_id))
            .await
    }

    /// Tombstoned accounts keep their email reserved, so they count here.
    pub async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.count(Filter::new().eq("email", email), true).await? > 0)
    }

    pub async fn phone_exists(&self, phone: &str) -> Result<bool, StoreError> {
        Ok(self.count(Filter::new().eq("phone", phone), true).await? > 0)
    }
}

//! Administrative account management.

use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::account::{ListAccountsQuery, UpdateAccountRequest};
use crate::dtos::Paginated;
use crate::models::{split_display_name, Account};
use crate::repositories::{AccountRepository, ListQuery};
use crate::store::{Filter, Record, SortDirection, Value};

#[derive(Clone)]
pub struct AccountService {
    accounts: AccountRepository,
}

impl AccountService {
    pub fn new(accounts: AccountRepository) -> Self {
        Self { accounts }
    }

    pub async fn list(&self, query: &ListAccountsQuery) -> Result<Paginated<Account>, AppError> {
        let mut filter = Filter::new();
        if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
            filter = filter.contains("name", name.trim());
        }
        if let Some(email) = &query.email {
            filter = filter.eq("email", email.as_str());
        }
        if let Some(active) = query.is_active {
            filter = filter.eq("is_active", active);
        }
        if let Some(admin) = query.is_admin {
            filter = filter.eq("is_admin", admin);
        }
        if let Some(moderator) = query.is_moderator {
            filter = filter.eq("is_moderator", moderator);
        }

        let pagination = query.pagination();
        let mut list = ListQuery::new(filter).paginate(pagination.skip(), pagination.page_size());
        for (field, direction) in [
            ("name", query.sort_by_name),
            ("created_at", query.sort_by_created_at),
            ("updated_at", query.sort_by_updated_at),
        ] {
            if let Some(direction) = direction {
                list = list.order_by(field, direction);
            }
        }
        if list.order_by.is_empty() {
            list = list.order_by("updated_at", SortDirection::Desc);
        }

        let page = self.accounts.find_many(list).await?;
        Ok(Paginated::from_page(page, &pagination))
    }

    pub async fn get(&self, id: Uuid) -> Result<Account, AppError> {
        Ok(self.accounts.get_by_id(id).await?)
    }

    pub async fn update(&self, id: Uuid, request: UpdateAccountRequest) -> Result<Account, AppError> {
        let mut changes = Record::new();

        if let Some(name) = request.name {
            let (first_name, last_name) = split_display_name(&name);
            changes.insert("first_name".to_string(), Value::from(first_name));
            changes.insert("last_name".to_string(), Value::from(last_name));
            changes.insert("name".to_string(), Value::from(name));
        }
        if let Some(email) = request.email {
            changes.insert("email".to_string(), Value::from(email));
        }
        if let Some(phone) = request.phone {
            changes.insert("phone".to_string(), Value::from(phone));
        }
        if let Some(photo_url) = request.photo_url {
            changes.insert("photo_url".to_string(), Value::from(photo_url));
        }
        if let Some(birth_date) = request.birth_date {
            changes.insert("birth_date".to_string(), Value::from(birth_date));
        }
        for (column, flag) in [
            ("is_active", request.is_active),
            ("is_admin", request.is_admin),
            ("is_moderator", request.is_moderator),
        ] {
            if let Some(flag) = flag {
                changes.insert(column.to_string(), Value::from(flag));
            }
        }

        if changes.is_empty() {
            return self.get(id).await;
        }
        changes.insert("updated_at".to_string(), Value::from(chrono::Utc::now()));

        let account = self.accounts.update(id, changes).await?;
        tracing::info!(account_id = %account.id, "Account updated");
        Ok(account)
    }

    /// Tombstones the account together with its events.
    pub async fn delete(&self, id: Uuid) -> Result<Account, AppError> {
        let account = self.accounts.delete(id).await?;
        tracing::info!(account_id = %account.id, "Account deleted");
        Ok(account)
    }
}

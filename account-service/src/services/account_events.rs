use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::account_event::ListAccountEventsQuery;
use crate::dtos::Paginated;
use crate::models::AccountEvent;
use crate::repositories::{AccountEventRepository, ListQuery};
use crate::store::{Filter, SortDirection};

#[derive(Clone)]
pub struct AccountEventService {
    events: AccountEventRepository,
}

impl AccountEventService {
    pub fn new(events: AccountEventRepository) -> Self {
        Self { events }
    }

    pub async fn list(
        &self,
        query: &ListAccountEventsQuery,
    ) -> Result<Paginated<AccountEvent>, AppError> {
        let mut filter = Filter::new();
        if let Some(account_id) = query.account_id {
            filter = filter.eq("account_id", account_id);
        }
        if let Some(event_type) = query.event_type {
            filter = filter.eq("event_type", event_type.as_str());
        }

        let pagination = query.pagination();
        let list = ListQuery::new(filter)
            .paginate(pagination.skip(), pagination.page_size())
            .order_by(
                "created_at",
                query.sort_by_created_at.unwrap_or(SortDirection::Desc),
            );

        let page = self.events.find_many(list).await?;
        Ok(Paginated::from_page(page, &pagination))
    }

    pub async fn get(&self, id: Uuid) -> Result<AccountEvent, AppError> {
        Ok(self.events.get_by_id(id).await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<AccountEvent, AppError> {
        let event = self.events.delete(id).await?;
        tracing::info!(event_id = %event.id, "Account event deleted");
        Ok(event)
    }
}

use serde::Deserialize;
use uuid::Uuid;

use super::PaginationParams;
use crate::models::EventType;
use crate::store::SortDirection;

/// Query string of `GET /v1/account-events`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListAccountEventsQuery {
    pub page: Option<u64>,
    pub offset: Option<u64>,
    pub account_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub event_type: Option<EventType>,
    pub sort_by_created_at: Option<SortDirection>,
}

impl ListAccountEventsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            offset: self.offset,
        }
    }
}

use serde::Deserialize;
use validator::Validate;

use super::PaginationParams;
use crate::store::SortDirection;

/// Query string of `GET /v1/accounts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListAccountsQuery {
    pub page: Option<u64>,
    pub offset: Option<u64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub is_moderator: Option<bool>,
    pub sort_by_name: Option<SortDirection>,
    pub sort_by_created_at: Option<SortDirection>,
    pub sort_by_updated_at: Option<SortDirection>,
}

impl ListAccountsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 5, max = 20, message = "Phone must be 5-20 characters"))]
    pub phone: Option<String>,

    #[validate(url(message = "Invalid photo URL"))]
    pub photo_url: Option<String>,

    pub birth_date: Option<chrono::DateTime<chrono::Utc>>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub is_moderator: Option<bool>,
}

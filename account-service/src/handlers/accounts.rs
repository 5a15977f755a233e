use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::account::{ListAccountsQuery, UpdateAccountRequest},
    utils::ValidatedJson,
    AppState,
};

pub async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.list(&query).await?))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.get(account_id).await?))
}

pub async fn update_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.update(account_id, req).await?))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.delete(account_id).await?))
}

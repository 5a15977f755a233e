use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{dtos::account_event::ListAccountEventsQuery, AppState};

pub async fn list_account_events(
    State(state): State<AppState>,
    Query(query): Query<ListAccountEventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.account_events.list(&query).await?))
}

pub async fn get_account_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.account_events.get(event_id).await?))
}

pub async fn delete_account_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.account_events.delete(event_id).await?))
}

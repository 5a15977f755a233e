use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        GoogleRegisterRequest, LoginRequest, LoginWithLinkRequest, RegisterRequest,
        SignInLinkResponse, VerifyEmailRequest,
    },
    middleware::CurrentIdentity,
    utils::ValidatedJson,
    AppState,
};

/// 200 when the email belongs to an account, 204 otherwise.
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<StatusCode, AppError> {
    if state.auth.verify_email_exists(&req.email).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register(req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.login(req).await?;
    Ok((StatusCode::OK, Json(res)))
}

pub async fn login_with_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginWithLinkRequest>,
) -> Result<Json<SignInLinkResponse>, AppError> {
    let base_url = req
        .base_url
        .or_else(|| {
            headers
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("base_url or Origin is required")))?;

    let url = state.auth.login_with_link(&req.email, &base_url).await?;
    Ok(Json(SignInLinkResponse { url }))
}

pub async fn google_register(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    body: Option<Json<GoogleRegisterRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let account = state
        .auth
        .register_with_identity(&identity, req.is_provider_anonymous)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn google_login(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    let account = state.auth.login_with_identity(&identity).await?;
    Ok(Json(account))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    let account = state.auth.me(&identity).await?;
    Ok(Json(serde_json::json!({
        "account": account,
        "identity": identity,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<StatusCode, AppError> {
    state.auth.logout(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

use axum::{extract::State, http::StatusCode, routing::{post, put}, Json, Router};
use tracing::instrument;

use super::dto::{
    ActivateUserRequest, AuthenticationRequest, AuthenticationTokenEnvelope, RegisterUserRequest,
    UserEnvelope,
};
use crate::error::{AppError, AppResult, ServiceError};
use crate::routes::{method_not_allowed, JsonBody};
use crate::state::AppState;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/users", post(register_user).fallback(method_not_allowed("POST")))
        .route(
            "/v1/users/activated",
            put(activate_user).fallback(method_not_allowed("PUT")),
        )
}

pub fn token_routes() -> Router<AppState> {
    Router::new().route(
        "/v1/tokens/authentication",
        post(create_authentication_token).fallback(method_not_allowed("POST")),
    )
}

#[instrument(skip_all)]
pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<UserEnvelope>)> {
    let user = state.users.create_user(body).await?;
    Ok((StatusCode::CREATED, Json(UserEnvelope { user })))
}

#[instrument(skip_all)]
pub async fn activate_user(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ActivateUserRequest>,
) -> AppResult<Json<UserEnvelope>> {
    match state.users.activate_user(&body.token).await {
        Ok(user) => Ok(Json(UserEnvelope { user })),
        Err(ServiceError::RecordNotFound) => Err(AppError::InvalidActivationToken),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip_all)]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<AuthenticationRequest>,
) -> AppResult<(StatusCode, Json<AuthenticationTokenEnvelope>)> {
    let token = state.users.create_authentication_token(body).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthenticationTokenEnvelope {
            authentication_token: token,
        }),
    ))
}

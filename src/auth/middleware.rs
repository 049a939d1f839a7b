use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::extractors::Identity;
use super::repo_types::{validate_token_plaintext, Scope};
use crate::db::RepoError;
use crate::error::{AppError, ServiceError};
use crate::state::AppState;
use crate::users::repo::UserRepository;
use crate::validation::Validator;

/// Resolves the caller's [`Identity`] and stores it in the request extensions.
///
/// No `Authorization` header means anonymous. Anything other than a well-formed,
/// live `Bearer` authentication token ends the request with 401.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let resolved = resolve_identity(state.user_repo.as_ref(), request.headers()).await;
    let mut response = match resolved {
        Ok(identity) => {
            if let Some(user) = identity.user() {
                debug!(user_id = user.id, "request authenticated");
            }
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

pub async fn resolve_identity(
    users: &dyn UserRepository,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    let value = match headers.get(header::AUTHORIZATION) {
        None => return Ok(Identity::Anonymous),
        Some(v) if v.is_empty() => return Ok(Identity::Anonymous),
        Some(v) => v.to_str().map_err(|_| AppError::InvalidAuthenticationToken)?,
    };

    let token = match value.split_once(' ') {
        Some(("Bearer", token)) if !token.contains(' ') => token,
        _ => {
            debug!("malformed authorization header");
            return Err(AppError::InvalidAuthenticationToken);
        }
    };

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, token);
    if !v.valid() {
        return Err(AppError::InvalidAuthenticationToken);
    }

    match users.get_for_token(Scope::Authentication, token).await {
        Ok(user) => Ok(Identity::User(user)),
        Err(RepoError::RecordNotFound) => Err(AppError::InvalidAuthenticationToken),
        Err(e) => Err(AppError::Service(ServiceError::from(e))),
    }
}

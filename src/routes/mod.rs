//! Request plumbing shared by the feature routers.

use std::future::{ready, Ready};

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{request::Parts, Method},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

pub mod health;

/// JSON body whose rejections render as `{"error": ...}` with 400.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

/// Query string whose rejections render as `{"error": ...}` with 400.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(QueryParams(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

/// Positive integer `:id` path segment; anything else is a 404.
pub struct IdParam(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdParam {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotFound)?;
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(IdParam(id)),
            _ => Err(AppError::NotFound),
        }
    }
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}

/// Method-router fallback answering 405 with `allow` as the `Allow` header.
pub fn method_not_allowed(
    allow: &'static str,
) -> impl Fn(Method) -> Ready<AppError> + Clone + Send + Sync + 'static {
    move |method| ready(AppError::MethodNotAllowed { method, allow })
}

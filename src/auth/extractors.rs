use std::marker::PhantomData;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use super::repo_types::{MOVIES_READ, MOVIES_WRITE};
use crate::error::{AppError, ServiceError};
use crate::state::AppState;
use crate::users::repo_types::User;

/// Who is calling. Set by the `authenticate` middleware on every request.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| AppError::Internal("request identity missing".into()))
    }
}

/// An authenticated user whose account is activated.
pub struct ActivatedUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ActivatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::Anonymous => Err(AppError::AuthenticationRequired),
            Identity::User(user) if !user.activated => Err(AppError::InactiveAccount),
            Identity::User(user) => Ok(ActivatedUser(user)),
        }
    }
}

pub trait PermissionCode {
    const CODE: &'static str;
}

pub struct MoviesRead;

impl PermissionCode for MoviesRead {
    const CODE: &'static str = MOVIES_READ;
}

pub struct MoviesWrite;

impl PermissionCode for MoviesWrite {
    const CODE: &'static str = MOVIES_WRITE;
}

/// An activated user holding permission `P`.
pub struct Permitted<P> {
    pub user: User,
    _permission: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P> FromRequestParts<AppState> for Permitted<P>
where
    P: PermissionCode + Send + Sync + 'static,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ActivatedUser(user) = ActivatedUser::from_request_parts(parts, state).await?;

        let permissions = state
            .permissions
            .get_all_for_user(user.id)
            .await
            .map_err(ServiceError::from)?;
        if !permissions.include(P::CODE) {
            debug!(user_id = user.id, required = P::CODE, "permission denied");
            return Err(AppError::NotPermitted);
        }

        Ok(Self {
            user,
            _permission: PhantomData,
        })
    }
}

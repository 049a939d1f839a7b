use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::dto::{AuthenticationRequest, RegisterUserRequest};
use super::password::{hash_password, password_matches, verify_decoy};
use super::repo::UserRepository;
use super::repo_types::{validate_user, NewUser, User};
use crate::auth::repo::{PermissionRepository, TokenRepository};
use crate::auth::repo_types::{
    validate_token_plaintext, Scope, Token, ACTIVATION_TTL, AUTHENTICATION_TTL, MOVIES_READ,
};
use crate::background::BackgroundTasks;
use crate::db::RepoError;
use crate::error::{ServiceError, ServiceResult};
use crate::mailer::{Email, Mailer};
use crate::tx::TxService;
use crate::validation::{validate_email, validate_password_plaintext, Validator};

#[async_trait]
pub trait UserService: Send + Sync {
    /// Registers an inactive user with `movies:read` and queues the welcome email.
    async fn create_user(&self, input: RegisterUserRequest) -> ServiceResult<User>;
    /// Consumes an activation token. Any failure to find a live token is
    /// `RecordNotFound`, whatever the cause.
    async fn activate_user(&self, plaintext: &str) -> ServiceResult<User>;
    async fn create_authentication_token(&self, input: AuthenticationRequest) -> ServiceResult<Token>;
}

pub struct Users {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenRepository>,
    permissions: Arc<dyn PermissionRepository>,
    tx: TxService,
    mailer: Arc<dyn Mailer>,
    tasks: BackgroundTasks,
}

impl Users {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn TokenRepository>,
        permissions: Arc<dyn PermissionRepository>,
        tx: TxService,
        mailer: Arc<dyn Mailer>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            users,
            tokens,
            permissions,
            tx,
            mailer,
            tasks,
        }
    }

    fn send_welcome(&self, user: &User, token: &Token) {
        let mailer = self.mailer.clone();
        let recipient = user.email.clone();
        let email = Email::welcome(user.id, &token.plaintext);
        self.tasks.spawn("welcome email", async move {
            mailer
                .send(&recipient, &email)
                .await
                .map_err(anyhow::Error::from)
        });
    }
}

#[async_trait]
impl UserService for Users {
    async fn create_user(&self, input: RegisterUserRequest) -> ServiceResult<User> {
        let name = input.name.trim().to_string();
        let email = input.email.trim().to_string();

        let mut v = Validator::new();
        validate_user(&mut v, &name, &email);
        validate_password_plaintext(&mut v, &input.password);
        v.finish().map_err(|errors| {
            debug!(%errors, "registration validation failed");
            ServiceError::Validation(errors)
        })?;

        let new_user = NewUser {
            name,
            email,
            password_hash: hash_password(&input.password)?,
            activated: false,
        };

        let users = self.users.clone();
        let permissions = self.permissions.clone();
        let tokens = self.tokens.clone();
        let (user, token) = self
            .tx
            .with_tx(move |tx| async move {
                let user = users.with_tx(&tx).insert(&new_user).await?;
                permissions
                    .with_tx(&tx)
                    .add_for_user(user.id, &[MOVIES_READ])
                    .await?;

                let token = Token::generate(user.id, ACTIVATION_TTL, Scope::Activation);
                tokens.with_tx(&tx).insert(&token).await?;
                Ok::<_, ServiceError>((user, token))
            })
            .await?;

        info!(user_id = user.id, "user registered");
        self.send_welcome(&user, &token);
        Ok(user)
    }

    async fn activate_user(&self, plaintext: &str) -> ServiceResult<User> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, plaintext);
        if let Err(errors) = v.finish() {
            debug!(%errors, "malformed activation token");
            return Err(ServiceError::RecordNotFound);
        }

        let plaintext = plaintext.to_string();
        let users = self.users.clone();
        let tokens = self.tokens.clone();
        let user = self
            .tx
            .with_tx(move |tx| async move {
                let users = users.with_tx(&tx);
                let mut user = users.get_for_token(Scope::Activation, &plaintext).await?;

                user.activated = true;
                let user = users.update(&user).await?;
                tokens
                    .with_tx(&tx)
                    .delete_all_for_user(Scope::Activation, user.id)
                    .await?;
                Ok::<_, ServiceError>(user)
            })
            .await?;

        info!(user_id = user.id, "user activated");
        Ok(user)
    }

    async fn create_authentication_token(&self, input: AuthenticationRequest) -> ServiceResult<Token> {
        let email = input.email.trim();

        let mut v = Validator::new();
        validate_email(&mut v, email);
        validate_password_plaintext(&mut v, &input.password);
        v.finish()?;

        let user = match self.users.get_by_email(email).await {
            Ok(user) => user,
            Err(RepoError::RecordNotFound) => {
                verify_decoy(&input.password);
                warn!("authentication failed: unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !password_matches(&input.password, &user.password_hash)? {
            warn!(user_id = user.id, "authentication failed: wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        let token = Token::generate(user.id, AUTHENTICATION_TTL, Scope::Authentication);
        let tokens = self.tokens.clone();
        let issued = token.clone();
        self.tx
            .with_tx(move |tx| async move {
                Ok::<_, ServiceError>(tokens.with_tx(&tx).insert(&issued).await?)
            })
            .await?;

        info!(user_id = user.id, "authentication token issued");
        Ok(token)
    }
}

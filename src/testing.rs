//! In-memory doubles for the repository, transaction and mail seams.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use crate::auth::repo::{PermissionRepository, TokenRepository};
use crate::auth::repo_types::{hash_token, Permissions, Scope, Token};
use crate::db::{RepoError, RepoResult};
use crate::mailer::{Email, MailError, Mailer};
use crate::movies::repo::MovieRepository;
use crate::movies::repo_types::{Movie, MovieDraft, MovieFilter, SortColumn};
use crate::tx::{Tx, TxError, TxManager};
use crate::users::repo::UserRepository;
use crate::users::repo_types::{NewUser, User};

#[derive(Default)]
struct Inner {
    movies: BTreeMap<i64, Movie>,
    next_movie_id: i64,
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    tokens: Vec<Token>,
    permissions: HashMap<i64, Vec<String>>,
}

/// Shared in-memory storage; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn movie(&self, id: i64) -> Option<Movie> {
        self.lock().movies.get(&id).cloned()
    }

    pub fn tokens_for(&self, user_id: i64) -> Vec<Token> {
        self.lock()
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn permissions_of(&self, user_id: i64) -> Permissions {
        Permissions::from(self.lock().permissions.get(&user_id).cloned().unwrap_or_default())
    }

    /// Inserts a user directly, bypassing registration.
    pub fn seed_user(&self, email: &str, activated: bool, permissions: &[&str]) -> User {
        let mut inner = self.lock();
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            created_at: OffsetDateTime::now_utc(),
            name: "Seeded".into(),
            email: email.into(),
            password_hash: "unused".into(),
            activated,
            version: 1,
        };
        inner.users.insert(user.id, user.clone());
        inner.permissions.insert(
            user.id,
            permissions.iter().map(|p| p.to_string()).collect(),
        );
        user
    }

    /// Stores a token with an arbitrary time to live, negative for already expired.
    pub fn seed_token(&self, user_id: i64, scope: Scope, ttl: Duration) -> Token {
        let token = Token::generate(user_id, ttl, scope);
        self.lock().tokens.push(token.clone());
        token
    }
}

fn sort_key_cmp(a: &Movie, b: &Movie, column: SortColumn) -> std::cmp::Ordering {
    match column {
        SortColumn::Id => a.id.cmp(&b.id),
        SortColumn::Title => a.title.cmp(&b.title),
        SortColumn::Year => a.year.cmp(&b.year),
        SortColumn::Runtime => a.runtime.cmp(&b.runtime),
    }
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert(&self, draft: &MovieDraft) -> RepoResult<Movie> {
        let mut inner = self.lock();
        inner.next_movie_id += 1;
        let movie = Movie {
            id: inner.next_movie_id,
            created_at: OffsetDateTime::now_utc(),
            title: draft.title.clone(),
            year: draft.year,
            runtime: draft.runtime,
            genres: draft.genres.clone(),
            version: 1,
        };
        inner.movies.insert(movie.id, movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: i64) -> RepoResult<Movie> {
        self.movie(id).ok_or(RepoError::RecordNotFound)
    }

    async fn list(&self, filter: &MovieFilter) -> RepoResult<Vec<Movie>> {
        let title = filter.title.to_lowercase();
        let mut movies: Vec<Movie> = self
            .lock()
            .movies
            .values()
            .filter(|m| title.is_empty() || m.title.to_lowercase().contains(&title))
            .filter(|m| filter.genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        movies.sort_by(|a, b| {
            let ord = sort_key_cmp(a, b, filter.sort);
            let ord = if filter.descending { ord.reverse() } else { ord };
            ord.then(a.id.cmp(&b.id))
        });

        Ok(movies
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update(&self, movie: &Movie) -> RepoResult<Movie> {
        let mut inner = self.lock();
        let stored = inner
            .movies
            .get_mut(&movie.id)
            .filter(|m| m.version == movie.version)
            .ok_or(RepoError::EditConflict)?;
        *stored = Movie {
            version: movie.version + 1,
            ..movie.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, id: i64) -> RepoResult<()> {
        self.lock()
            .movies
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::RecordNotFound)
    }

    fn with_tx(&self, _tx: &Tx) -> Box<dyn MovieRepository> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &NewUser) -> RepoResult<User> {
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(RepoError::DuplicateEmail);
        }
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            created_at: OffsetDateTime::now_utc(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            activated: user.activated,
            version: 1,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> RepoResult<User> {
        self.lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::RecordNotFound)
    }

    async fn update(&self, user: &User) -> RepoResult<User> {
        let mut inner = self.lock();
        let stored = inner
            .users
            .get_mut(&user.id)
            .filter(|u| u.version == user.version)
            .ok_or(RepoError::EditConflict)?;
        *stored = User {
            version: user.version + 1,
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> RepoResult<User> {
        let hash = hash_token(plaintext);
        let now = OffsetDateTime::now_utc();
        let inner = self.lock();
        inner
            .tokens
            .iter()
            .find(|t| t.hash == hash && t.scope == scope && t.expiry > now)
            .and_then(|t| inner.users.get(&t.user_id))
            .cloned()
            .ok_or(RepoError::RecordNotFound)
    }

    fn with_tx(&self, _tx: &Tx) -> Box<dyn UserRepository> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, token: &Token) -> RepoResult<()> {
        self.lock().tokens.push(token.clone());
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> RepoResult<()> {
        self.lock()
            .tokens
            .retain(|t| !(t.scope == scope && t.user_id == user_id));
        Ok(())
    }

    fn with_tx(&self, _tx: &Tx) -> Box<dyn TokenRepository> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> RepoResult<Permissions> {
        Ok(self.permissions_of(user_id))
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> RepoResult<()> {
        let mut inner = self.lock();
        let granted = inner.permissions.entry(user_id).or_default();
        for code in codes {
            if !granted.iter().any(|c| c == code) {
                granted.push(code.to_string());
            }
        }
        Ok(())
    }

    fn with_tx(&self, _tx: &Tx) -> Box<dyn PermissionRepository> {
        Box::new(self.clone())
    }
}

/// Counts unit-of-work calls; hands out detached handles.
#[derive(Default)]
pub struct RecordingTxManager {
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    fail_rollback: bool,
}

impl RecordingTxManager {
    pub fn failing_rollback() -> Self {
        Self {
            fail_rollback: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TxManager for RecordingTxManager {
    async fn begin(&self) -> Result<Tx, TxError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Tx::detached())
    }

    async fn commit(&self, _tx: Tx) -> Result<(), sqlx::Error> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _tx: Tx) -> Result<(), sqlx::Error> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback {
            return Err(sqlx::Error::PoolClosed);
        }
        Ok(())
    }
}

/// Keeps delivered mail in memory; can be switched to fail every send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, Email)>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Email)> {
        self.sent.lock().unwrap().clone()
    }

    /// Activation token quoted in the most recent message.
    pub fn last_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, email) = sent.last()?;
        let marker = "{\"token\": \"";
        let start = email.text_body.find(marker)? + marker.len();
        let rest = &email.text_body[start..];
        rest.find('"').map(|end| rest[..end].to_string())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, recipient: &str, email: &Email) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            let err = "not an address".parse::<lettre::Address>().unwrap_err();
            return Err(MailError::Address(err));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), email.clone()));
        Ok(())
    }
}

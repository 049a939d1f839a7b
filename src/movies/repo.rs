use async_trait::async_trait;
use sqlx::{Executor, Postgres};

use super::repo_types::{Movie, MovieDraft, MovieFilter};
use crate::db::{with_executor, DbPools, RepoError, RepoResult};
use crate::tx::Tx;

#[async_trait]
pub trait MovieRepository: Send + Sync {
    async fn insert(&self, draft: &MovieDraft) -> RepoResult<Movie>;
    async fn get(&self, id: i64) -> RepoResult<Movie>;
    async fn list(&self, filter: &MovieFilter) -> RepoResult<Vec<Movie>>;
    /// Writes `movie` if its `version` still matches storage; returns the stored row
    /// with the bumped version, or `EditConflict`.
    async fn update(&self, movie: &Movie) -> RepoResult<Movie>;
    async fn delete(&self, id: i64) -> RepoResult<()>;
    fn with_tx(&self, tx: &Tx) -> Box<dyn MovieRepository>;
}

#[derive(Clone)]
pub struct PgMovieRepository {
    db: DbPools,
    tx: Option<Tx>,
}

impl PgMovieRepository {
    pub fn new(db: DbPools) -> Self {
        Self { db, tx: None }
    }
}

#[async_trait]
impl MovieRepository for PgMovieRepository {
    async fn insert(&self, draft: &MovieDraft) -> RepoResult<Movie> {
        let movie = with_executor!(&self.tx, &self.db.write, |ex| insert_movie(ex, draft))?;
        Ok(movie)
    }

    async fn get(&self, id: i64) -> RepoResult<Movie> {
        with_executor!(&self.tx, &self.db.read, |ex| fetch_movie(ex, id))?
            .ok_or(RepoError::RecordNotFound)
    }

    async fn list(&self, filter: &MovieFilter) -> RepoResult<Vec<Movie>> {
        let rows = with_executor!(&self.tx, &self.db.read, |ex| fetch_movies(ex, filter))?;
        Ok(rows)
    }

    async fn update(&self, movie: &Movie) -> RepoResult<Movie> {
        with_executor!(&self.tx, &self.db.write, |ex| update_movie(ex, movie))?
            .ok_or(RepoError::EditConflict)
    }

    async fn delete(&self, id: i64) -> RepoResult<()> {
        let affected = with_executor!(&self.tx, &self.db.write, |ex| delete_movie(ex, id))?;
        if affected == 0 {
            return Err(RepoError::RecordNotFound);
        }
        Ok(())
    }

    fn with_tx(&self, tx: &Tx) -> Box<dyn MovieRepository> {
        Box::new(Self {
            db: self.db.clone(),
            tx: Some(tx.clone()),
        })
    }
}

// ---- Queries ----

async fn insert_movie<'e, E>(ex: E, draft: &MovieDraft) -> Result<Movie, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Movie>(
        r#"
        INSERT INTO movies (title, year, runtime, genres)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, title, year, runtime, genres, version
        "#,
    )
    .bind(&draft.title)
    .bind(draft.year)
    .bind(draft.runtime)
    .bind(&draft.genres)
    .fetch_one(ex)
    .await
}

async fn fetch_movie<'e, E>(ex: E, id: i64) -> Result<Option<Movie>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Movie>(
        r#"
        SELECT id, created_at, title, year, runtime, genres, version
          FROM movies
         WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(ex)
    .await
}

async fn fetch_movies<'e, E>(ex: E, filter: &MovieFilter) -> Result<Vec<Movie>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = list_sql(filter);

    sqlx::query_as::<_, Movie>(&sql)
        .bind(&filter.title)
        .bind(&filter.genres)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(ex)
        .await
}

async fn update_movie<'e, E>(ex: E, movie: &Movie) -> Result<Option<Movie>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Movie>(
        r#"
        UPDATE movies
           SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
         WHERE id = $5 AND version = $6
        RETURNING id, created_at, title, year, runtime, genres, version
        "#,
    )
    .bind(&movie.title)
    .bind(movie.year)
    .bind(movie.runtime)
    .bind(&movie.genres)
    .bind(movie.id)
    .bind(movie.version)
    .fetch_optional(ex)
    .await
}

async fn delete_movie<'e, E>(ex: E, id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM movies WHERE id = $1")
        .bind(id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

// The sort column comes from a closed enum, never from user text.
fn list_sql(filter: &MovieFilter) -> String {
    format!(
        r#"
        SELECT id, created_at, title, year, runtime, genres, version
          FROM movies
         WHERE ($1 = '' OR STRPOS(LOWER(title), LOWER($1)) > 0)
           AND (cardinality($2::text[]) = 0 OR genres @> $2)
         ORDER BY {} {}, id ASC
         LIMIT $3 OFFSET $4
        "#,
        filter.sort.as_sql(),
        if filter.descending { "DESC" } else { "ASC" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movies::repo_types::SortColumn;

    const MOVIES_MIGRATION: &str =
        include_str!("../../migrations/20240101000001_create_movies.sql");

    #[test]
    fn listing_sorts_then_breaks_ties_by_id() {
        let filter = MovieFilter {
            sort: SortColumn::Year,
            descending: true,
            ..MovieFilter::default()
        };
        assert!(list_sql(&filter).contains("ORDER BY year DESC, id ASC"));
        assert!(list_sql(&MovieFilter::default()).contains("ORDER BY id ASC, id ASC"));
    }

    #[test]
    fn indexes_match_the_listing_filters() {
        let sql = list_sql(&MovieFilter::default());
        assert!(sql.contains("genres @> $2"));
        assert!(MOVIES_MIGRATION.contains("USING GIN (genres)"));

        assert!(sql.contains("STRPOS(LOWER(title)"));
        assert!(!MOVIES_MIGRATION.contains("to_tsvector"));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::dto::UpdateMovieRequest;
use super::repo::MovieRepository;
use super::repo_types::{Movie, MovieDraft, MovieFilter};
use crate::error::{ServiceError, ServiceResult};
use crate::tx::TxService;
use crate::validation::Validator;

#[async_trait]
pub trait MovieService: Send + Sync {
    async fn create_movie(&self, draft: MovieDraft) -> ServiceResult<Movie>;
    async fn get_movie(&self, id: i64) -> ServiceResult<Movie>;
    async fn list_movies(&self, filter: MovieFilter) -> ServiceResult<Vec<Movie>>;
    /// Read-modify-write under optimistic locking. A lost race surfaces as
    /// `EditConflict`; nothing is retried here.
    async fn update_movie(
        &self,
        id: i64,
        input: UpdateMovieRequest,
        expected_version: Option<i32>,
    ) -> ServiceResult<Movie>;
    async fn delete_movie(&self, id: i64) -> ServiceResult<()>;
}

pub struct Movies {
    repo: Arc<dyn MovieRepository>,
    tx: TxService,
}

impl Movies {
    pub fn new(repo: Arc<dyn MovieRepository>, tx: TxService) -> Self {
        Self { repo, tx }
    }
}

fn validate(draft: &MovieDraft) -> ServiceResult<()> {
    let mut v = Validator::new();
    draft.validate(&mut v);
    v.finish().map_err(|errors| {
        debug!(%errors, "movie validation failed");
        ServiceError::Validation(errors)
    })
}

#[async_trait]
impl MovieService for Movies {
    async fn create_movie(&self, draft: MovieDraft) -> ServiceResult<Movie> {
        validate(&draft)?;

        let repo = self.repo.clone();
        let movie = self
            .tx
            .with_tx(move |tx| async move {
                Ok::<_, ServiceError>(repo.with_tx(&tx).insert(&draft).await?)
            })
            .await?;

        info!(movie_id = movie.id, "movie created");
        Ok(movie)
    }

    async fn get_movie(&self, id: i64) -> ServiceResult<Movie> {
        Ok(self.repo.get(id).await?)
    }

    async fn list_movies(&self, filter: MovieFilter) -> ServiceResult<Vec<Movie>> {
        Ok(self.repo.list(&filter).await?)
    }

    async fn update_movie(
        &self,
        id: i64,
        input: UpdateMovieRequest,
        expected_version: Option<i32>,
    ) -> ServiceResult<Movie> {
        let repo = self.repo.clone();
        let movie = self
            .tx
            .with_tx(move |tx| async move {
                let repo = repo.with_tx(&tx);

                let mut movie = repo.get(id).await?;
                if expected_version.is_some_and(|v| v != movie.version) {
                    return Err(ServiceError::EditConflict);
                }

                input.apply(&mut movie);
                validate(&MovieDraft::from(&movie))?;

                Ok::<_, ServiceError>(repo.update(&movie).await?)
            })
            .await?;

        info!(movie_id = movie.id, version = movie.version, "movie updated");
        Ok(movie)
    }

    async fn delete_movie(&self, id: i64) -> ServiceResult<()> {
        let repo = self.repo.clone();
        self.tx
            .with_tx(move |tx| async move {
                Ok::<_, ServiceError>(repo.with_tx(&tx).delete(id).await?)
            })
            .await?;

        info!(movie_id = id, "movie deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{MemoryStore, RecordingTxManager};

    fn draft(title: &str) -> MovieDraft {
        MovieDraft {
            title: title.into(),
            year: 1999,
            runtime: 136,
            genres: vec!["sci-fi".into(), "action".into()],
        }
    }

    fn service() -> (Movies, MemoryStore, Arc<RecordingTxManager>) {
        let store = MemoryStore::default();
        let manager = Arc::new(RecordingTxManager::default());
        let movies = Movies::new(Arc::new(store.clone()), TxService::new(manager.clone()));
        (movies, store, manager)
    }

    #[tokio::test]
    async fn create_starts_at_version_one() {
        let (svc, _, manager) = service();
        let movie = svc.create_movie(draft("The Matrix")).await.unwrap();
        assert_eq!(movie.version, 1);
        assert_eq!(manager.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_transaction() {
        let (svc, _, manager) = service();
        let err = svc.create_movie(draft("")).await.unwrap_err();
        match err {
            ServiceError::Validation(errors) => assert!(errors.get("title").is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_untouched_fields() {
        let (svc, _, _) = service();
        let created = svc.create_movie(draft("The Matrix")).await.unwrap();
        // Two updates get it to version 3 before the checked one.
        for _ in 0..2 {
            svc.update_movie(created.id, UpdateMovieRequest::default(), None)
                .await
                .unwrap();
        }

        let input = UpdateMovieRequest {
            title: Some("New Title".into()),
            ..Default::default()
        };
        let updated = svc.update_movie(created.id, input, None).await.unwrap();

        assert_eq!(updated.version, 4);
        assert_eq!(updated.title, "New Title");
        assert_eq!(updated.year, created.year);
        assert_eq!(updated.runtime, created.runtime);
        assert_eq!(updated.genres, created.genres);
    }

    #[tokio::test]
    async fn update_of_missing_movie_is_not_found() {
        let (svc, _, manager) = service();
        let err = svc
            .update_movie(99, UpdateMovieRequest::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RecordNotFound));
        assert_eq!(manager.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_merge_is_rejected() {
        let (svc, store, _) = service();
        let created = svc.create_movie(draft("The Matrix")).await.unwrap();
        let input = UpdateMovieRequest {
            runtime: Some(-1),
            ..Default::default()
        };
        let err = svc.update_movie(created.id, input, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(store.movie(created.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn stale_version_loses_the_race() {
        let (svc, store, _) = service();
        let created = svc.create_movie(draft("The Matrix")).await.unwrap();

        // Both writers read version 1; only the first write can land.
        let first = UpdateMovieRequest {
            title: Some("First".into()),
            ..Default::default()
        };
        let second = UpdateMovieRequest {
            title: Some("Second".into()),
            ..Default::default()
        };
        let ok = svc.update_movie(created.id, first, Some(1)).await.unwrap();
        let err = svc.update_movie(created.id, second, Some(1)).await.unwrap_err();

        assert_eq!(ok.version, 2);
        assert!(matches!(err, ServiceError::EditConflict));
        assert_eq!(store.movie(created.id).unwrap().title, "First");
    }

    #[tokio::test]
    async fn repository_rejects_write_from_stale_read() {
        let (svc, store, _) = service();
        let created = svc.create_movie(draft("The Matrix")).await.unwrap();

        let mut a = store.get(created.id).await.unwrap();
        let mut b = store.get(created.id).await.unwrap();
        a.title = "A".into();
        b.title = "B".into();

        assert!(store.update(&a).await.is_ok());
        assert!(matches!(
            store.update(&b).await,
            Err(crate::db::RepoError::EditConflict)
        ));
    }

    #[tokio::test]
    async fn delete_reports_missing_rows() {
        let (svc, _, _) = service();
        let created = svc.create_movie(draft("The Matrix")).await.unwrap();
        svc.delete_movie(created.id).await.unwrap();
        assert!(matches!(
            svc.delete_movie(created.id).await,
            Err(ServiceError::RecordNotFound)
        ));
        assert!(matches!(
            svc.get_movie(created.id).await,
            Err(ServiceError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_genre() {
        let (svc, _, _) = service();
        svc.create_movie(draft("The Matrix")).await.unwrap();
        let mut other = draft("Amelie");
        other.genres = vec!["romance".into()];
        svc.create_movie(other).await.unwrap();

        let filter = MovieFilter {
            genres: vec!["romance".into()],
            ..MovieFilter::default()
        };
        let movies = svc.list_movies(filter).await.unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Amelie");
    }
}

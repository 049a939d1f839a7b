use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::dto::{
    CreateMovieRequest, ListMoviesQuery, MessageEnvelope, MovieEnvelope, MoviesEnvelope,
    UpdateMovieRequest,
};
use crate::auth::extractors::{MoviesRead, MoviesWrite, Permitted};
use crate::error::{AppError, AppResult};
use crate::routes::{method_not_allowed, IdParam, JsonBody, QueryParams};
use crate::state::AppState;

pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

pub fn collection_routes() -> Router<AppState> {
    Router::new().route(
        "/v1/movies",
        get(list_movies)
            .post(create_movie)
            .fallback(method_not_allowed("GET, POST")),
    )
}

pub fn item_routes() -> Router<AppState> {
    Router::new().route(
        "/v1/movies/:id",
        get(show_movie)
            .patch(update_movie)
            .delete(delete_movie)
            .fallback(method_not_allowed("GET, PATCH, DELETE")),
    )
}

#[instrument(skip_all, fields(user_id = caller.user.id))]
pub async fn create_movie(
    State(state): State<AppState>,
    caller: Permitted<MoviesWrite>,
    JsonBody(body): JsonBody<CreateMovieRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<MovieEnvelope>)> {
    let movie = state.movies.create_movie(body.into()).await?;

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    headers.insert(header::LOCATION, location);

    Ok((StatusCode::CREATED, headers, Json(MovieEnvelope { movie })))
}

#[instrument(skip_all, fields(user_id = caller.user.id))]
pub async fn list_movies(
    State(state): State<AppState>,
    caller: Permitted<MoviesRead>,
    QueryParams(query): QueryParams<ListMoviesQuery>,
) -> AppResult<Json<MoviesEnvelope>> {
    let filter = query.into_filter().map_err(AppError::Validation)?;
    let movies = state.movies.list_movies(filter).await?;
    Ok(Json(MoviesEnvelope { movies }))
}

#[instrument(skip(state, caller), fields(user_id = caller.user.id))]
pub async fn show_movie(
    State(state): State<AppState>,
    caller: Permitted<MoviesRead>,
    IdParam(id): IdParam,
) -> AppResult<Json<MovieEnvelope>> {
    let movie = state.movies.get_movie(id).await?;
    Ok(Json(MovieEnvelope { movie }))
}

#[instrument(skip(state, caller, headers, body), fields(user_id = caller.user.id))]
pub async fn update_movie(
    State(state): State<AppState>,
    caller: Permitted<MoviesWrite>,
    IdParam(id): IdParam,
    headers: HeaderMap,
    JsonBody(body): JsonBody<UpdateMovieRequest>,
) -> AppResult<Json<MovieEnvelope>> {
    let expected_version = expected_version(&headers)?;
    let movie = state.movies.update_movie(id, body, expected_version).await?;
    Ok(Json(MovieEnvelope { movie }))
}

#[instrument(skip(state, caller), fields(user_id = caller.user.id))]
pub async fn delete_movie(
    State(state): State<AppState>,
    caller: Permitted<MoviesWrite>,
    IdParam(id): IdParam,
) -> AppResult<Json<MessageEnvelope>> {
    state.movies.delete_movie(id).await?;
    Ok(Json(MessageEnvelope {
        message: "movie successfully deleted",
    }))
}

fn expected_version(headers: &HeaderMap) -> AppResult<Option<i32>> {
    let Some(raw) = headers.get(EXPECTED_VERSION_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("invalid X-Expected-Version header".into()))
}

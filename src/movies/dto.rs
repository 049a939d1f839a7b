use serde::{Deserialize, Serialize};

use super::repo_types::{Movie, MovieDraft, MovieFilter, SortColumn};
use crate::validation::{ValidationErrors, Validator};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMovieRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub runtime: i32,
    #[serde(default)]
    pub genres: Vec<String>,
}

impl From<CreateMovieRequest> for MovieDraft {
    fn from(r: CreateMovieRequest) -> Self {
        Self {
            title: r.title,
            year: r.year,
            runtime: r.runtime,
            genres: r.genres,
        }
    }
}

/// Partial update; absent and `null` fields both leave the stored value alone.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
}

impl UpdateMovieRequest {
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMoviesQuery {
    pub title: Option<String>,
    pub genres: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

impl ListMoviesQuery {
    pub fn into_filter(self) -> Result<MovieFilter, ValidationErrors> {
        let mut filter = MovieFilter::default();
        let mut v = Validator::new();

        filter.title = self.title.unwrap_or_default().trim().to_string();
        filter.genres = self
            .genres
            .unwrap_or_default()
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();

        if let Some(page) = parse_int(&mut v, "page", self.page) {
            v.check(page > 0, "page", "must be greater than zero");
            v.check(page <= 10_000_000, "page", "must be a maximum of 10 million");
            filter.page = page;
        }
        if let Some(size) = parse_int(&mut v, "page_size", self.page_size) {
            v.check(size > 0, "page_size", "must be greater than zero");
            v.check(size <= 100, "page_size", "must be a maximum of 100");
            filter.page_size = size;
        }
        if let Some(sort) = self.sort {
            let (descending, key) = match sort.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, sort.as_str()),
            };
            let column = match key {
                "id" => Some(SortColumn::Id),
                "title" => Some(SortColumn::Title),
                "year" => Some(SortColumn::Year),
                "runtime" => Some(SortColumn::Runtime),
                _ => None,
            };
            match column {
                Some(c) => {
                    filter.sort = c;
                    filter.descending = descending;
                }
                None => v.add_error("sort", "invalid sort value"),
            }
        }

        v.finish().map(|_| filter)
    }
}

fn parse_int(v: &mut Validator, field: &str, raw: Option<String>) -> Option<i64> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            v.add_error(field, "must be an integer value");
            None
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MovieEnvelope {
    pub movie: Movie,
}

#[derive(Debug, Serialize)]
pub struct MoviesEnvelope {
    pub movies: Vec<Movie>,
}

#[derive(Debug, Serialize)]
pub struct MessageEnvelope {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    #[test]
    fn partial_update_touches_only_present_fields() {
        let mut movie = Movie {
            id: 5,
            created_at: OffsetDateTime::now_utc(),
            title: "Old".into(),
            year: 1999,
            runtime: 120,
            genres: vec!["drama".into()],
            version: 3,
        };
        let input: UpdateMovieRequest =
            serde_json::from_str(r#"{"title":"New Title","year":null}"#).unwrap();
        input.apply(&mut movie);
        assert_eq!(movie.title, "New Title");
        assert_eq!(movie.year, 1999);
        assert_eq!(movie.runtime, 120);
        assert_eq!(movie.version, 3);
    }

    #[test]
    fn list_query_parses_filters() {
        let q = ListMoviesQuery {
            title: Some(" alien ".into()),
            genres: Some("sci-fi, horror,".into()),
            page: Some("2".into()),
            page_size: Some("5".into()),
            sort: Some("-year".into()),
        };
        let f = q.into_filter().unwrap();
        assert_eq!(f.title, "alien");
        assert_eq!(f.genres, vec!["sci-fi".to_string(), "horror".to_string()]);
        assert_eq!(f.sort, SortColumn::Year);
        assert!(f.descending);
        assert_eq!(f.offset(), 5);
    }

    #[test]
    fn list_query_rejects_bad_values() {
        let q = ListMoviesQuery {
            page: Some("0".into()),
            page_size: Some("1000".into()),
            sort: Some("created_at".into()),
            ..Default::default()
        };
        let errors = q.into_filter().unwrap_err();
        assert!(errors.get("page").is_some());
        assert!(errors.get("page_size").is_some());
        assert_eq!(errors.get("sort"), Some("invalid sort value"));
    }

    #[test]
    fn list_query_rejects_non_numeric_page() {
        let q = ListMoviesQuery {
            page: Some("two".into()),
            ..Default::default()
        };
        let errors = q.into_filter().unwrap_err();
        assert_eq!(errors.get("page"), Some("must be an integer value"));
    }

    #[test]
    fn movie_json_hides_created_at() {
        let movie = Movie {
            id: 1,
            created_at: OffsetDateTime::now_utc(),
            title: "Heat".into(),
            year: 1995,
            runtime: 170,
            genres: vec!["crime".into()],
            version: 1,
        };
        let json = serde_json::to_value(MovieEnvelope { movie }).unwrap();
        assert_eq!(json["movie"]["title"], "Heat");
        assert!(json["movie"].get("created_at").is_none());
    }
}

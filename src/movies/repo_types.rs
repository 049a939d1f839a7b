use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::validation::{unique, Validator};

pub const EARLIEST_YEAR: i32 = 1888;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Movie {
    pub id: i64,
    #[serde(skip_serializing)]
    pub created_at: OffsetDateTime,
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Fields of a movie that callers supply; id, timestamps and version come from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieDraft {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

impl From<&Movie> for MovieDraft {
    fn from(m: &Movie) -> Self {
        Self {
            title: m.title.clone(),
            year: m.year,
            runtime: m.runtime,
            genres: m.genres.clone(),
        }
    }
}

impl MovieDraft {
    pub fn validate(&self, v: &mut Validator) {
        let latest_year = OffsetDateTime::now_utc().year() + 1;

        v.check(!self.title.is_empty(), "title", "must be provided");
        v.check(self.title.len() <= 500, "title", "must not be more than 500 bytes long");

        v.check(self.year != 0, "year", "must be provided");
        v.check(self.year >= EARLIEST_YEAR, "year", "must be greater than 1888");
        v.check(self.year <= latest_year, "year", "must not be in the future");

        v.check(self.runtime != 0, "runtime", "must be provided");
        v.check(self.runtime > 0, "runtime", "must be a positive integer");

        v.check(!self.genres.is_empty(), "genres", "must contain at least 1 genre");
        v.check(
            self.genres.iter().all(|g| !g.is_empty()),
            "genres",
            "must not contain empty values",
        );
        v.check(unique(&self.genres), "genres", "must not contain duplicate values");
    }
}

/// Sort keys accepted by the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Title,
    Year,
    Runtime,
}

impl SortColumn {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Title => "title",
            SortColumn::Year => "year",
            SortColumn::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieFilter {
    pub title: String,
    pub genres: Vec<String>,
    pub page: i64,
    pub page_size: i64,
    pub sort: SortColumn,
    pub descending: bool,
}

impl Default for MovieFilter {
    fn default() -> Self {
        Self {
            title: String::new(),
            genres: Vec::new(),
            page: 1,
            page_size: 20,
            sort: SortColumn::Id,
            descending: false,
        }
    }
}

impl MovieFilter {
    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

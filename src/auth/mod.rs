pub mod extractors;
pub mod middleware;
pub mod rate_limit;
pub mod repo;
pub mod repo_types;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::method_not_allowed;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthEnvelope {
    pub health: Health,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/healthcheck", get(healthcheck).fallback(method_not_allowed("GET")))
}

async fn healthcheck(State(state): State<AppState>) -> Json<HealthEnvelope> {
    Json(HealthEnvelope {
        health: Health {
            status: "available",
            environment: state.config.server.env.clone(),
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}

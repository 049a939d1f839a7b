use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{extract::DefaultBodyLimit, middleware, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::auth::{middleware::authenticate, rate_limit::rate_limit};
use crate::error::panic_response;
use crate::routes::{health, not_found};
use crate::state::AppState;
use crate::{movies, users};

const MAX_BODY_BYTES: usize = 1_048_576;

pub fn build_app(state: AppState) -> Router {
    let routes = Router::new()
        .merge(health::router())
        .merge(movies::router())
        .merge(users::router());
    with_middleware(routes, state)
}

/// Panic recovery, then rate limiting, then authentication, around `routes`.
fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
        .with_state(state)
}

/// Serves until SIGINT/SIGTERM, then drains requests within the configured
/// timeout and waits for background tasks.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let server_cfg = state.config.server.clone();
    let addr: SocketAddr = format!("{}:{}", server_cfg.host, server_cfg.port)
        .parse()
        .context("invalid listen address")?;

    let purge_loop = state.rate_limiter.start();
    let app = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, env = %server_cfg.env, "starting server");

    let stop = CancellationToken::new();
    let stopped = stop.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stopped.cancelled().await });
    let mut server = tokio::spawn(async move { server.await });

    let outcome = tokio::select! {
        joined = &mut server => {
            warn!("server exited without a shutdown signal");
            joined
                .context("server task failed")
                .and_then(|res| res.context("server error"))
        }
        () = shutdown_signal() => {
            info!("shutting down server");
            stop.cancel();

            let drain = Duration::from_secs(server_cfg.shutdown_timeout_secs);
            match tokio::time::timeout(drain, &mut server).await {
                Ok(joined) => joined
                    .context("server task failed")
                    .and_then(|res| res.context("server error")),
                Err(_) => {
                    server.abort();
                    Err(anyhow::anyhow!(
                        "in-flight requests did not finish within {}s",
                        drain.as_secs()
                    ))
                }
            }
        }
    };

    wind_down(&state, purge_loop, outcome).await
}

/// Stops the limiter's purge loop and waits for background tasks, then
/// returns `outcome`.
async fn wind_down(
    state: &AppState,
    purge_loop: JoinHandle<()>,
    outcome: anyhow::Result<()>,
) -> anyhow::Result<()> {
    state.rate_limiter.stop();
    if let Err(e) = purge_loop.await {
        error!(error = %e, "rate limiter purge loop failed");
    }

    info!(in_flight = state.tasks.in_flight(), "completing background tasks");
    state.tasks.shutdown().await;

    outcome?;
    info!("stopped server");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

//! Administrative HTTP trigger for migration runs

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tm_migrate::{MigrateError, MigrationRunner};

use crate::cli::{GlobalArgs, ServeArgs};
use crate::commands::common::ErrorEnvelope;
use crate::context::RuntimeContext;

/// State shared across all handlers
pub(crate) struct AppState {
    runner: MigrationRunner,
    admin_token: Option<String>,
}

impl AppState {
    pub(crate) fn new(runner: MigrationRunner, admin_token: Option<String>) -> Self {
        Self {
            runner,
            admin_token,
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(expected) = &self.admin_token else {
            return Ok(());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err((StatusCode::UNAUTHORIZED, "missing or invalid admin token").into_response())
        }
    }
}

/// Execute the serve command
pub async fn execute(args: &ServeArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let server = &ctx.config.server;
    let host = args.host.clone().unwrap_or_else(|| server.host.clone());
    let port = args.port.unwrap_or(server.port);

    let state = Arc::new(AppState::new(
        ctx.runner(false)?,
        server.admin_token.clone(),
    ));
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("Invalid host:port")?;

    if server.admin_token.is_none() {
        log::warn!("server.admin_token is not set; admin routes are unauthenticated");
    }
    println!("Serving migration trigger at http://{addr}");
    println!("  POST /admin/migrations/run");
    println!("  GET  /admin/migrations");
    println!("Press Ctrl+C to stop.\n");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

/// Build the trigger router
pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/migrations", get(migration_status))
        .route("/admin/migrations/run", post(run_migrations))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn run_migrations(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }

    log::info!("Migration run requested over HTTP");
    match state.runner.run().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn migration_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = state.authorize(&headers) {
        return denied;
    }

    match state.runner.status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &MigrateError) -> Response {
    let status = match err {
        MigrateError::LockTimeout { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorEnvelope::from(err))).into_response()
}

#[cfg(test)]
#[path = "serve_test.rs"]
mod tests;

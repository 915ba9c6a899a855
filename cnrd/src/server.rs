use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use cnr_core::browser::{SessionManager, SessionProvider};
use cnr_core::{progress_channel, LookupEngine};

use crate::{AppError, Result};

pub struct AppState {
    pub engine: Arc<LookupEngine>,
    pub sessions: Arc<SessionManager>,
}

type AppStateArc = Arc<AppState>;

pub async fn run(state: AppState, bind_addr: &str) -> Result<()> {
    let sessions = Arc::clone(&state.sessions);

    let app = Router::new()
        .route("/", get(home))
        .route("/api/case-details", get(case_details))
        .route("/api/health", get(health))
        .route("/api/restart-driver", post(restart_driver))
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("listening on http://{bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(AppError::Io)?;

    info!("shutting down, closing browser session");
    sessions.quit().await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CaseDetailsParams {
    cnr_number: Option<String>,
}

/// Cancels the in-flight lookup when the SSE stream is dropped, which is how
/// a client disconnect reaches the engine.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn case_details(
    State(state): State<AppStateArc>,
    Query(params): Query<CaseDetailsParams>,
) -> Response {
    let Some(cnr_number) = params
        .cnr_number
        .filter(|value| !value.trim().is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "CNR number is required",
                "status": "failure"
            })),
        )
            .into_response();
    };

    info!(cnr_number, "case lookup requested");
    let (progress, events) = progress_channel();
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        engine
            .run_with_cancel(&cnr_number, &progress, task_cancel)
            .await;
    });

    let guard = CancelOnDrop(cancel);
    let stream = events.map(move |event| {
        let _held = &guard;
        Ok::<Event, Infallible>(
            Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}")),
        )
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn health(State(state): State<AppStateArc>) -> Response {
    match state.sessions.probe().await {
        Some(current_url) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "browser_status": "running",
                "current_url": current_url
            })),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "browser_status": "error"
            })),
        )
            .into_response(),
    }
}

async fn restart_driver(State(state): State<AppStateArc>) -> Response {
    match state.sessions.restart().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Browser session restarted successfully"
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "failure",
                "error": format!("Failed to restart browser session: {err}")
            })),
        )
            .into_response(),
    }
}

async fn home() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>CNR Details API</title></head>
<body>
<h1>CNR Details API</h1>
<p>Fetches case details from the eCourts portal by CNR number, with live
progress updates over Server-Sent Events.</p>
<ul>
  <li><code>GET /api/case-details?cnr_number=...</code> &mdash; SSE stream of
      progress events; the final event carries the extracted sections.</li>
  <li><code>GET /api/health</code> &mdash; browser session liveness.</li>
  <li><code>POST /api/restart-driver</code> &mdash; force a browser session restart.</li>
</ul>
<p>Example: <code>curl -N 'http://localhost:5000/api/case-details?cnr_number=MHAU010012342022'</code></p>
<p>Events are JSON records with <code>status</code> (processing | success | error),
<code>message</code>, <code>progress</code> (0&ndash;100) and, on the final
success event only, <code>data</code>.</p>
</body>
</html>
"#,
    )
}

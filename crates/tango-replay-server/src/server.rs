//! HTTP transport for workflow replays.
//!
//! Every request gets its own run and browser session. The streaming endpoint
//! forwards log entries as server-sent events while the run is in progress;
//! the batch endpoints answer with the whole [`RunReport`] once it is done.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tango_replay::{CancellationToken, ChannelSink, ExecutionLog, RunReport, WorkflowRunner};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    runner: Arc<WorkflowRunner>,
}

impl AppState {
    pub fn new(runner: WorkflowRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub url: Option<String>,
}

impl RunRequest {
    fn target(self) -> Option<String> {
        self.url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }
}

/// Streams one `data:` event per log entry. Dropping the response (client
/// gone) cancels the run; the runner still closes its browser.
async fn run_stream(
    State(state): State<AppState>,
    Query(request): Query<RunRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sink, entries) = ChannelSink::channel();
    let log = ExecutionLog::new().with_sink(sink);

    let guard = match request.target() {
        Some(url) => {
            info!(%url, "starting streamed replay");
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let runner = state.runner.clone();
            tokio::spawn(async move {
                let report = runner.run(&url, log, token).await;
                info!(url = %report.url, status = ?report.status, "streamed replay finished");
            });
            Some(cancel.drop_guard())
        }
        None => {
            log.error(None, "Missing URL");
            None
        }
    };

    let events = stream::unfold((entries, guard), |(mut entries, guard)| async move {
        let entry = entries.recv().await?;
        let event = Event::default().data(entry.render());
        Some((Ok(event), (entries, guard)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn run_batch_query(
    State(state): State<AppState>,
    Query(request): Query<RunRequest>,
) -> Response {
    run_batch(state, request).await
}

async fn run_batch_json(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Response {
    run_batch(state, request).await
}

async fn run_batch(state: AppState, request: RunRequest) -> Response {
    let Some(url) = request.target() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Missing URL" })),
        )
            .into_response();
    };

    info!(%url, "starting batch replay");
    // The run lives in its own task so an aborted request still tears the
    // session down; the guard cancels it when this handler is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let runner = state.runner.clone();
    let handle = tokio::spawn(async move { runner.run(&url, ExecutionLog::new(), cancel).await });

    match handle.await {
        Ok(report) => report_response(report),
        Err(e) => {
            error!("replay task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("replay task failed: {e}") })),
            )
                .into_response()
        }
    }
}

fn report_response(report: RunReport) -> Response {
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report)).into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tango-replay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run-tango-sse", get(run_stream))
        .route("/run-tango", get(run_batch_query).post(run_batch_json))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server running on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! HTTP surface of the Control API.
//!
//! Every queue route lives under `/api/v1` and requires a bearer token;
//! `/health` sits at the root and is open.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderName;
use axum::routing::{get, post, put};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::engine::Engine;

pub use auth::{Access, AuthConfig, Caller};
pub use error::{ApiError, ApiResult};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(engine: Engine, auth: AuthConfig) -> Self {
        Self {
            engine,
            auth: Arc::new(auth),
        }
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(handlers::enqueue).get(handlers::list))
        .route(
            "/tasks/{id}",
            get(handlers::get_task).patch(handlers::patch_log),
        )
        .route("/tasks/{id}/finalize", put(handlers::finalize))
        .route("/tasks/{id}/cancel", post(handlers::cancel))
        .route("/tasks/{id}/priority-boost", post(handlers::priority_boost))
        .route("/queue/claim", post(handlers::claim))
}

/// Build the full router with tracing and request-id layers.
pub fn router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

/// Serve `router` on `bind` until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "control api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub mod handlers;

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use handlers::ApiState;

/// Multipart framing on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;
    let asset_dir = state.asset_dir.clone();

    let api_routes = Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/status", get(handlers::handle_status))
        .route(
            "/predict/{task}",
            post(handlers::handle_predict).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/history/{task}", get(handlers::handle_history))
        .route("/history/{task}/{id}", delete(handlers::handle_history_delete))
        .with_state(state);

    let mut app = Router::new().nest("/api", api_routes);
    if let Some(dir) = asset_dir {
        app = app.nest_service("/assets", ServeDir::new(dir));
    }

    app.layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn serve(
    state: ApiState,
    bind_addr: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((bind_addr, port)).await?;
    tracing::info!(bind_addr, port, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

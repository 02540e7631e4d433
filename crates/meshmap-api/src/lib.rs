//! meshmap-api — the HTTP boundary: inbound mutation/query routes over
//! the node core, plus the outbound webhook relay.

pub mod handlers;
pub mod notifier;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;
pub use notifier::Notifier;

async fn handle_healthy() -> &'static str {
    "OK"
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/netstat", post(handlers::handle_netstat))
        .route(
            "/status",
            get(handlers::handle_node_status).post(handlers::handle_status_update),
        )
        .route("/tracert", post(handlers::handle_tracert))
        .route(
            "/records",
            get(handlers::handle_records_get)
                .post(handlers::handle_records_post)
                .delete(handlers::handle_records_delete),
        )
        .route(
            "/exceptions",
            get(handlers::handle_exceptions_get)
                .post(handlers::handle_exceptions_post)
                .delete(handlers::handle_exceptions_delete),
        )
        .route("/webhook", post(handlers::handle_webhook))
        .with_state(state);

    Router::new()
        .route("/-/healthy", get(handle_healthy))
        .nest("/api/v1", api_routes)
        .layer(cors)
}

pub async fn serve(state: ApiState, listen: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen, "http api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

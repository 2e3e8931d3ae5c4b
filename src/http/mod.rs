//! HTTP transport: one axum router bridging onto the generic serving
//! engine in `crate::server`. Grounded on `http/routes.rs`'s CORS/tracing
//! conventions; request/response handling itself lives in `bridge`.

pub mod bridge;

use crate::state::AppState;
use axum::http::{header, Method};
use axum::routing::{any, get};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
        .allow_private_network(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_check))
        .route("/{*path}", any(bridge::handle_dynamic_request))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::log::Log;
    use crate::server::Server;
    use std::sync::Arc;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let server = Arc::new(Server::new());
        let instance = Instance::new(server, Log::new_memory());
        let _router = create_router(AppState::new(instance));
    }
}

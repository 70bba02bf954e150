use axum::routing::{get, head};
use axum::Router;

use crate::http::handlers;
use crate::http::AppState;

/// Build the router. Reload and click answer any method other than GET with
/// 400, HEAD included: `get` alone would also route HEAD to the handler.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_handler))
        .route(
            "/api/system/reload",
            head(handlers::method_not_allowed)
                .get(handlers::reload_handler)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/users/:username/links/:url",
            head(handlers::method_not_allowed)
                .get(handlers::click_handler)
                .fallback(handlers::method_not_allowed),
        )
        .with_state(state)
}

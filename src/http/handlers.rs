use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::clicks::handle_click;
use crate::errors::{AppError, AppResult};
use crate::http::AppState;
use crate::reconcile::run_reload;
use crate::store::ProfileStore;

pub async fn method_not_allowed() -> Response {
    AppError::Validation("Invalid request: GET request required".to_string()).into_response()
}

pub async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(error) = state.authorizer.authorize(&headers) {
        tracing::warn!(error = %error, "reload refused");
        return error.into_response();
    }

    let result = tokio::task::spawn_blocking(move || run_reload(&state.db, state.source.as_ref())).await;
    match result {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "reload task failed");
            AppError::Internal(format!("reload task failed: {}", error)).into_response()
        }
    }
}

pub async fn click_handler(
    State(state): State<AppState>,
    Path((username, url)): Path<(String, String)>,
) -> Response {
    let result = tokio::task::spawn_blocking({
        let username = username.clone();
        let url = url.clone();
        move || handle_click(&state.db, &username, &url)
    })
    .await;

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(error)) => return error.into_response(),
        Err(error) => {
            tracing::error!(username = %username, url = %url, error = %error, "click task failed");
            return AppError::NotFound(format!("failed loading link {} for username: {}", url, username))
                .into_response();
        }
    };

    match HeaderValue::try_from(outcome.redirect_to.as_str()) {
        Ok(location) => (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, location)]).into_response(),
        Err(error) => {
            tracing::error!(username = %username, url = %url, error = %error, "link url is not a valid Location");
            AppError::Internal(format!("link {} cannot be used as a redirect target", url)).into_response()
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Response {
    let result = tokio::task::spawn_blocking(move || -> AppResult<u64> { state.db.session()?.count_profiles() }).await;
    match result {
        Ok(Ok(profiles)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "profiles": profiles })),
        )
            .into_response(),
        Ok(Err(error)) => unavailable(error.to_string()),
        Err(error) => unavailable(error.to_string()),
    }
}

fn unavailable(reason: String) -> Response {
    tracing::warn!(error = %reason, "health check failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "status": "unavailable", "error": reason })),
    )
        .into_response()
}

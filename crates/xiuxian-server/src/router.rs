//! Axum router construction for the API server.
//!
//! Assembles all routes (REST + WebSocket) into a single [`Router`]
//! with CORS and tracing middleware for cross-origin dashboard access.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// Routes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws` -- tick frame stream
/// - `GET /api/state` -- current world snapshot
/// - `GET /api/map` -- static map, served once
/// - `GET /api/events` -- paginated event history
/// - `GET /api/detail` -- avatar/region/sect detail
/// - `POST /api/control/{action}` -- pause/resume/reset/reinit/shutdown
/// - `POST /api/game/{action}` -- start/save/load/delete/list
///
/// CORS allows any origin for development; production deployments
/// should restrict it.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_ticks))
        .route("/api/state", get(handlers::get_state))
        .route("/api/map", get(handlers::get_map))
        .route("/api/events", get(handlers::get_events))
        .route("/api/detail", get(handlers::get_detail))
        .route("/api/control/{action}", post(handlers::control))
        .route("/api/game/{action}", post(handlers::game))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use xiuxian_core::operator::OperatorState;

    use super::*;

    fn test_state() -> AppState {
        let (commands, _rx) = mpsc::channel(4);
        AppState::new(Arc::new(OperatorState::new()), commands)
    }

    #[tokio::test]
    async fn index_serves_html() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn state_endpoint_answers_with_the_snapshot() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/state")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn events_without_a_game_is_503() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/events")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn pause_control_flips_the_operator() {
        let state = test_state();
        let operator = Arc::clone(&state.operator);
        let router = build_router(state);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/control/pause")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NO_CONTENT);
        assert!(operator.is_paused());
    }

    #[tokio::test]
    async fn unknown_control_is_rejected() {
        let router = build_router(test_state());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/control/explode")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}

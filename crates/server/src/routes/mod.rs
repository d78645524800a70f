//! HTTP surface: the websocket endpoint plus read-only stream and health
//! routes.

pub mod health;
pub mod streams;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use livehub_shared::{HubError, ProblemDetails};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

/// Error response carrying an RFC7807 body.
#[derive(Debug)]
pub struct ApiError(pub ProblemDetails);

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError(ProblemDetails::from_hub_error(&err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/streams/{stream_id}/viewers", get(streams::viewer_count))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

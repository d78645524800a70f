//! Stream routes.

use axum::{
    extract::{Path, State},
    Json,
};
use livehub_shared::ViewerCount;

use super::ApiError;
use crate::state::AppState;

/// `GET /api/streams/{stream_id}/viewers`: the live member count. Streams
/// nobody has joined yet are 404.
pub async fn viewer_count(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<ViewerCount>, ApiError> {
    let count = state.gateway.rooms().viewer_count(&stream_id).await?;
    Ok(Json(ViewerCount { stream_id, count }))
}

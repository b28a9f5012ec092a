use crate::handlers::common::{created_response, success_response};
use crate::{errors::ServiceError, services::items::CreateItemInput, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for item endpoints
pub fn items_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_item))
        .route("/:id", get(get_item))
        .route("/:id/release", post(release_item))
        .route("/:id/cart-entries", delete(remove_from_all_carts))
}

/// Create a new item
async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateItemInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let item = state.services.items.create_item(payload).await?;
    Ok(created_response(item))
}

/// Get an item by ID
async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let item = state
        .services
        .items
        .get_item(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", id)))?;

    Ok(success_response(item))
}

/// Mark an item available again
async fn release_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.items.release(id).await?;

    let item = state
        .services
        .items
        .get_item(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", id)))?;

    Ok(success_response(item))
}

/// Pull an item's entry out of every cart that references it
async fn remove_from_all_carts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let result = state.services.carts.remove_item_everywhere(id).await?;
    Ok(success_response(result))
}

use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::{
    errors::ServiceError,
    services::{carts::AddToCartInput, reservation::ReserveOptions},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:user_id", get(get_cart))
        .route("/:user_id/items", post(add_to_cart))
        .route("/:user_id/items/:item_id/reserve", post(reserve_item))
        .route("/:user_id/checkout", post(checkout))
        .route("/:user_id/clear", post(clear_cart))
}

/// Get a user's cart with its entries
async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart_with_items = state.services.carts.get_cart(&user_id).await?;
    Ok(success_response(cart_with_items))
}

/// Add an item to a user's cart, creating the cart on first use
async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state.services.carts.add_item(&user_id, payload).await?;
    Ok(success_response(cart))
}

/// Reserve a single item on behalf of a user's cart.
///
/// Storage-level failures surface as 503 with a retry hint; the reservation
/// is reported only through an explicit outcome, never inferred from one.
async fn reserve_item(
    State(state): State<Arc<AppState>>,
    Path((user_id, item_id)): Path<(String, Uuid)>,
    payload: Option<Json<ReserveOptions>>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let options = payload.map(|Json(o)| o).unwrap_or_default();

    let outcome = state
        .services
        .reservation
        .reserve_for_cart(&user_id, item_id, options)
        .await
        .map_err(retryable)?;

    Ok(success_response(outcome))
}

#[derive(Debug, Serialize)]
struct CheckoutItemResult {
    item_id: Uuid,
    reserved: bool,
    availability: bool,
    item_found: bool,
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    user_id: String,
    all_reserved: bool,
    results: Vec<CheckoutItemResult>,
}

/// Attempt to reserve every item in the user's cart.
///
/// The cart is left intact regardless of outcome; callers inspect the
/// per-item results and decide whether to retry, drop entries, or proceed.
async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    payload: Option<Json<ReserveOptions>>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let options = payload.map(|Json(o)| o).unwrap_or_default();
    let cart = state.services.carts.get_cart(&user_id).await?;

    let mut results = Vec::with_capacity(cart.items.len());
    let mut all_reserved = true;

    for entry in &cart.items {
        match state
            .services
            .reservation
            .reserve_for_cart(&user_id, entry.item_id, options)
            .await
        {
            Ok(outcome) => {
                all_reserved &= outcome.reserved;
                results.push(CheckoutItemResult {
                    item_id: entry.item_id,
                    reserved: outcome.reserved,
                    availability: outcome.availability,
                    item_found: outcome.item_found,
                });
            }
            Err(err) => {
                warn!(item_id = %entry.item_id, user_id, error = %err, "Checkout reservation failed");
                all_reserved = false;
                results.push(CheckoutItemResult {
                    item_id: entry.item_id,
                    reserved: false,
                    availability: false,
                    item_found: true,
                });
            }
        }
    }

    Ok(success_response(CheckoutResponse {
        user_id,
        all_reserved,
        results,
    }))
}

/// Empty a user's cart without releasing its reservations
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.carts.clear_cart(&user_id).await?;
    Ok(no_content_response())
}

/// Rewraps storage failures as retryable; client errors pass through.
fn retryable(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::ValidationError(_)
        | ServiceError::NotFound(_)
        | ServiceError::InvalidInput(_)
        | ServiceError::InvalidOperation(_) => err,
        other => {
            warn!(error = %other, "Reservation hit a storage failure");
            ServiceError::ServiceUnavailable(
                "Reservation could not be completed, please try again".to_string(),
            )
        }
    }
}

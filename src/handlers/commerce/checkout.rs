use crate::handlers::common::{created_response, map_service_error, validate_input};
use crate::{
    auth::{AuthUser, ROLE_CUSTOMER},
    errors::ApiError,
    services::commerce::CheckoutRequest,
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/checkout", post(checkout))
}

/// Turns the caller's cart into a pending order and returns payment instructions.
async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_CUSTOMER)?;
    validate_input(&payload)?;

    let instructions = state
        .services
        .checkout
        .checkout(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(instructions))
}

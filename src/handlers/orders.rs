use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::handlers::common::{map_service_error, success_response};
use crate::services::payments::GatewayKind;
use crate::{
    auth::{AuthUser, ROLE_ADMIN, ROLE_CUSTOMER},
    errors::ApiError,
    AppState,
};

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/me", get(list_my_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment", post(attach_payment))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    id: Uuid,
    status: OrderStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPaymentRequest {
    pub preferred_gateway: Option<GatewayKind>,
}

/// Admin: every order
async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let orders = state
        .services
        .order
        .list_all()
        .await
        .map_err(map_service_error)?;
    Ok(success_response(orders))
}

async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .order
        .list_for_user(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .order
        .find_for_user(user.user_id, user.is_admin(), id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// Admin: move an order along the status machine
async fn update_order_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let order = state
        .services
        .order_status
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(StatusResponse {
        id: order.id,
        status: order.status,
    }))
}

/// Retry payment initiation for a pending order the caller owns.
async fn attach_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<AttachPaymentRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_CUSTOMER)?;
    let preferred = payload.and_then(|Json(body)| body.preferred_gateway);
    let instructions = state
        .services
        .payments
        .attach_payment(user.user_id, id, preferred)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(instructions))
}

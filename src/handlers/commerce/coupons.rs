use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response, validate_input,
};
use crate::{
    auth::{AuthUser, ROLE_ADMIN},
    errors::ApiError,
    services::commerce::{CreateCouponInput, UpdateCouponInput},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/validate", get(validate_coupon))
        .route(
            "/coupons/:id",
            get(get_coupon).put(update_coupon).delete(delete_coupon),
        )
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponQuery {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub order_amount: Decimal,
    pub currency: Option<String>,
}

/// Public: preview a coupon's discount for an order amount
async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateCouponQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&query)?;
    let result = state
        .services
        .coupon
        .validate(&query.code, query.order_amount, query.currency.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(result))
}

async fn create_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let coupon = state
        .services
        .coupon
        .create(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(coupon))
}

async fn list_coupons(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let coupons = state
        .services
        .coupon
        .list()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupons))
}

async fn get_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let coupon = state
        .services
        .coupon
        .get(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupon))
}

async fn update_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    let coupon = state
        .services
        .coupon
        .update(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(coupon))
}

async fn delete_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    user.require_role(ROLE_ADMIN)?;
    state
        .services
        .coupon
        .delete(id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

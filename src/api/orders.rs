//! Order API endpoints: checkout, status progression and delivery tracking.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    AssignCourierRequest, CheckoutRequest, Order, OrderStatus, OrderTracking,
    RecordPositionRequest, TrackingPoint, UpdateOrderStatusRequest,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
}

/// POST /api/users/:id/orders - Turn the main cart into a pending order.
pub async fn checkout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state
        .repo
        .checkout(&user_id, &request, state.config.delivery_fee)
        .await
    {
        Ok(order) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(order, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/users/:id/orders - A customer's order history, newest first.
pub async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Order>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_user_orders(&user_id).await {
        Ok(orders) => success(orders, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/orders/:id
pub async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_order(&id).await {
        Ok(Some(order)) => success(order, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Order {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/orders/:id/cancel - Cancel before the courier picks it up.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.cancel_order(&id).await {
        Ok(order) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(order, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/orders/:id/tracking
pub async fn get_tracking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OrderTracking> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.order_tracking(&id).await {
        Ok(tracking) => success(tracking, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/admin/orders - All orders, optionally filtered by status.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Vec<Order>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let status = match filter.status.as_deref() {
        Some(raw) => match OrderStatus::from_str(raw) {
            Some(status) => Some(status),
            None => {
                return error(
                    AppError::BadRequest(format!("Unknown order status: {}", raw)),
                    revision_id,
                )
            }
        },
        None => None,
    };

    match state.repo.list_orders(status).await {
        Ok(orders) => success(orders, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/orders/:id/status - Move an order along its lifecycle.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.transition_order(&id, request.status).await {
        Ok(order) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(order, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/orders/:id/assign - Hand a validated order to a courier.
pub async fn assign_courier(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AssignCourierRequest>,
) -> ApiResult<Order> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.assign_courier(&id, &request.courier_id).await {
        Ok(order) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(order, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/admin/orders/:id/tracking - Record a courier position.
pub async fn record_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RecordPositionRequest>,
) -> ApiResult<TrackingPoint> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.record_position(&id, &request).await {
        Ok(point) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(point, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

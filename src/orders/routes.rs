//! REST endpoints for tenant-facing order management.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrderError;
use crate::orders::model::{Order, OrderStatus};
use crate::store::Database;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Shared state for order routes.
#[derive(Clone)]
pub struct OrderRouteState {
    pub db: Arc<dyn Database>,
}

/// Build the order-management REST routes.
pub fn order_routes(state: OrderRouteState) -> Router {
    Router::new()
        .route("/api/tenants/{tenant_id}/orders", get(list_orders))
        .route("/api/orders/{order_id}", get(get_order))
        .route("/api/orders/{order_id}/status", put(update_status))
        .with_state(state)
}

/// Move an order to `target`, enforcing the lifecycle.
///
/// The write is a compare-and-set on the status read here, so two racing
/// updates cannot both succeed from the same starting state.
pub async fn transition(
    db: &dyn Database,
    id: Uuid,
    target: OrderStatus,
) -> Result<Order, OrderError> {
    let order = db.get_order(id).await?.ok_or(OrderError::NotFound { id })?;

    let invalid = |state: OrderStatus| OrderError::InvalidTransition {
        id,
        state: state.to_string(),
        target: target.to_string(),
    };
    if !order.status.can_transition_to(target) {
        return Err(invalid(order.status));
    }
    if !db.update_order_status(id, order.status, target).await? {
        let current = db
            .get_order(id)
            .await?
            .ok_or(OrderError::NotFound { id })?;
        return Err(invalid(current.status));
    }

    info!(order_id = %id, from = %order.status, to = %target, "Order status updated");
    Ok(Order {
        status: target,
        updated_at: Utc::now(),
        ..order
    })
}

// ── Handlers ────────────────────────────────────────────────────────────

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| error_body(StatusCode::BAD_REQUEST, format!("Invalid {what} ID")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

/// GET /api/tenants/{tenant_id}/orders?status=&limit=
async fn list_orders(
    State(state): State<OrderRouteState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let tenant_id = match parse_id(&tenant_id, "tenant") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<OrderStatus>() {
            Ok(s) => Some(s),
            Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.db.list_orders(tenant_id, status, limit).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to list orders");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list orders")
        }
    }
}

/// GET /api/orders/{order_id}
async fn get_order(State(state): State<OrderRouteState>, Path(order_id): Path<String>) -> Response {
    let order_id = match parse_id(&order_id, "order") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.db.get_order(order_id).await {
        Ok(Some(order)) => Json(order).into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Order not found"),
        Err(e) => {
            warn!(order_id = %order_id, error = %e, "Failed to load order");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load order")
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: String,
}

/// PUT /api/orders/{order_id}/status
async fn update_status(
    State(state): State<OrderRouteState>,
    Path(order_id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Response {
    let order_id = match parse_id(&order_id, "order") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let target = match body.status.parse::<OrderStatus>() {
        Ok(s) => s,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match transition(state.db.as_ref(), order_id, target).await {
        Ok(order) => Json(order).into_response(),
        Err(e @ OrderError::NotFound { .. }) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ OrderError::InvalidTransition { .. }) => {
            error_body(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ OrderError::UnknownStatus(_)) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        Err(OrderError::Database(e)) => {
            warn!(order_id = %order_id, error = %e, "Failed to update order status");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update order")
        }
    }
}

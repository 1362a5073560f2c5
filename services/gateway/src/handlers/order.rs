use crate::error::AppError;
use crate::models::{CancelQuery, OrderResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use types::ids::OrderId;
use types::order::{NewOrder, Order};

/// Accept `BTC-USDT`, `BTC_USDT` or an encoded `BTC/USDT` in a path segment
pub fn symbol_from_path(segment: &str) -> String {
    segment.replacen(['-', '_'], "/", 1)
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let engine = state.registry.get(payload.symbol.as_str())?;
    let user_id = payload.user_id;
    let report = engine.submit(payload).await?;

    tracing::info!(
        order_id = %report.order.order_id,
        %user_id,
        status = report.order.status.as_str(),
        trades = report.trades.len(),
        "order submitted"
    );
    Ok((StatusCode::CREATED, Json(report.into())))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path((symbol, order_id)): Path<(String, OrderId)>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Order>, AppError> {
    let engine = state.registry.get(&symbol_from_path(&symbol))?;
    let order = engine.cancel(query.user_id, order_id).await?;
    tracing::info!(%order_id, user_id = %query.user_id, "order cancelled");
    Ok(Json(order))
}

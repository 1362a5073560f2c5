use crate::error::AppError;
use crate::models::{BalancesResponse, DepositRequest};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use types::account::Balance;
use types::ids::UserId;

pub async fn get_balances(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<BalancesResponse> {
    Json(BalancesResponse {
        user_id,
        balances: state.ledger.balances(user_id),
    })
}

/// Credit funds, standing in for the wallet subsystem
pub async fn deposit(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<DepositRequest>,
) -> Result<Json<Balance>, AppError> {
    if payload.currency.is_empty() {
        return Err(AppError::BadRequest("currency must not be empty".into()));
    }
    let balance = state.ledger.deposit(user_id, &payload.currency, payload.amount)?;
    tracing::info!(%user_id, currency = %payload.currency, amount = %payload.amount, "deposit credited");
    Ok(Json(balance))
}

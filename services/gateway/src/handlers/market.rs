use crate::error::AppError;
use crate::models::{CandleQuery, DepthQuery, LimitQuery};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use market_data::protocol::{
    DEFAULT_CANDLE_LIMIT, DEFAULT_DEPTH, DEFAULT_TRADE_LIMIT, MAX_DEPTH, MAX_LIMIT,
};
use market_data::trades::PublicTrade;
use market_data::{Candle, Interval};
use matching_engine::{BookSnapshot, EngineHandle, Ticker};
use types::ids::MarketId;
use types::symbol::SymbolConfig;

fn engine(state: &AppState, base: &str, quote: &str) -> Result<EngineHandle, AppError> {
    Ok(state.registry.get(&format!("{base}/{quote}"))?)
}

pub async fn list_markets(State(state): State<AppState>) -> Json<Vec<SymbolConfig>> {
    Json(state.registry.symbols())
}

pub async fn depth(
    State(state): State<AppState>,
    Path((base, quote)): Path<(String, String)>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<BookSnapshot>, AppError> {
    let depth = query.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH);
    let view = engine(&state, &base, &quote)?.view();
    Ok(Json(view.book.truncated(depth)))
}

pub async fn ticker(
    State(state): State<AppState>,
    Path((base, quote)): Path<(String, String)>,
) -> Result<Json<Ticker>, AppError> {
    Ok(Json(engine(&state, &base, &quote)?.view().ticker.clone()))
}

pub async fn trades(
    State(state): State<AppState>,
    Path((base, quote)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<PublicTrade>>, AppError> {
    let handle = engine(&state, &base, &quote)?;
    let limit = query.limit.unwrap_or(DEFAULT_TRADE_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.recorder.recent_trades(handle.symbol(), limit)))
}

pub async fn candles(
    State(state): State<AppState>,
    Path((base, quote)): Path<(String, String)>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Vec<Candle>>, AppError> {
    let handle = engine(&state, &base, &quote)?;
    let interval: Interval = query
        .interval
        .parse()
        .map_err(|err| AppError::BadRequest(format!("{err}")))?;
    let limit = query.limit.unwrap_or(DEFAULT_CANDLE_LIMIT).clamp(1, MAX_LIMIT);
    let symbol: &MarketId = handle.symbol();
    Ok(Json(state.recorder.candles(symbol, interval, limit)))
}

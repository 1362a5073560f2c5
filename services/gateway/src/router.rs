use crate::handlers::{account, market, order, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/orders", post(order::create_order))
        .route("/orders/{symbol}/{order_id}", delete(order::cancel_order))
        .route("/balances/{user_id}", get(account::get_balances))
        .route("/balances/{user_id}/deposits", post(account::deposit))
        .route("/markets", get(market::list_markets))
        .route("/markets/{base}/{quote}/depth", get(market::depth))
        .route("/markets/{base}/{quote}/ticker", get(market::ticker))
        .route("/markets/{base}/{quote}/trades", get(market::trades))
        .route("/markets/{base}/{quote}/candles", get(market::candles))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use serde::{Deserialize, Serialize};
use types::account::Balance;
use types::ids::UserId;
use types::order::Order;
use types::trade::Trade;

use matching_engine::OrderReport;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Set when matching stopped on a persistence failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<OrderReport> for OrderResponse {
    fn from(report: OrderReport) -> Self {
        Self {
            order: report.order,
            trades: report.trades,
            error: report.error.map(|err| err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalancesResponse {
    pub user_id: UserId,
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleQuery {
    pub interval: String,
    pub limit: Option<usize>,
}

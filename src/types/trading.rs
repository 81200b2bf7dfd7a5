//! Order, trade and portfolio view types.

use super::{AccountType, Asset, Balances, Notification};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Trade status. Every trade the ledger records is executed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Executed,
    Pending,
}

fn default_leverage() -> f64 {
    1.0
}

/// An executed order. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub symbol: String,
    /// Notional value in quote currency.
    pub amount: f64,
    #[serde(rename = "qty")]
    pub quantity: f64,
    pub price: f64,
    /// Execution time in milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub status: TradeStatus,
    pub account: AccountType,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

impl Trade {
    /// Create a new executed trade record.
    pub fn executed(
        side: OrderSide,
        symbol: &str,
        quantity: f64,
        price: f64,
        account: AccountType,
        leverage: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            side,
            symbol: symbol.to_string(),
            amount: quantity * price,
            quantity,
            price,
            timestamp,
            status: TradeStatus::Executed,
            account,
            leverage,
        }
    }
}

/// Request to execute a market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user_id: String,
    pub account: AccountType,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Execution price, normally the last price from the market view.
    pub price: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

impl OrderRequest {
    pub fn buy(user_id: &str, account: AccountType, symbol: &str, quantity: f64, price: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            account,
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            price,
            leverage: 1.0,
        }
    }

    pub fn sell(user_id: &str, account: AccountType, symbol: &str, quantity: f64, price: f64) -> Self {
        Self {
            side: OrderSide::Sell,
            ..Self::buy(user_id, account, symbol, quantity, price)
        }
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }
}

/// Result of a successfully executed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub trade: Trade,
    /// Balance of the addressed account after the order.
    pub balance: f64,
    /// Position after the order; `None` once fully closed.
    pub position: Option<Asset>,
    /// Margin debited (buy) or net proceeds credited (sell).
    pub cash_delta: f64,
}

/// What an order would cost, without executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPreview {
    pub notional: f64,
    pub margin_required: f64,
    pub borrowed_delta: f64,
    pub available_balance: f64,
    pub buying_power: f64,
    pub accepted: bool,
}

/// A position valued at the current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub asset: Asset,
    pub current_price: f64,
    pub value: f64,
    pub unrealized_pnl: f64,
    /// `None` when the cost basis is zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<f64>,
    pub net_equity: f64,
}

/// Account overview computed from the market view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub account: AccountType,
    pub balance: f64,
    pub positions: Vec<PositionView>,
    /// Sum of position market values, ignoring debt.
    pub gross_value: f64,
    pub total_borrowed: f64,
    pub net_worth: f64,
    pub buying_power: f64,
    pub leverage: f64,
}

/// Everything the ledger knows about one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub balances: Balances,
    pub demo_positions: Vec<Asset>,
    pub live_positions: Vec<Asset>,
    pub trades: Vec<Trade>,
    pub notifications: Vec<Notification>,
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `(timestamp, price)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Sample time in milliseconds.
    pub time: i64,
    pub price: f64,
}

/// Live quote for one tracked instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    /// 24h change in percent.
    pub change_24h: f64,
    pub volume: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    /// Oldest first, bounded by the feed's history capacity.
    pub history: Vec<PricePoint>,
}

impl MarketData {
    /// A quote with no data, used when the snapshot fetch fails.
    pub fn zeroed(symbol: &str, name: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            price: 0.0,
            change_24h: 0.0,
            volume: 0.0,
            high_24h: 0.0,
            low_24h: 0.0,
            history: Vec::new(),
        }
    }

    /// Whether this quote has ever received a usable price.
    pub fn has_price(&self) -> bool {
        self.price > 0.0
    }
}

/// Snapshot quote fields consumed from the upstream REST endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
}

/// A trade tick re-keyed to a local symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    /// Trade time in milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Liveness of the market feed and its streaming subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum FeedStatus {
    Idle,
    Initializing,
    Connecting,
    Open,
    Closed,
    Error(String),
}

impl FeedStatus {
    /// Whether a supervisor should consider restarting the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeedStatus::Closed | FeedStatus::Error(_))
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStatus::Idle => write!(f, "idle"),
            FeedStatus::Initializing => write!(f, "initializing"),
            FeedStatus::Connecting => write!(f, "connecting"),
            FeedStatus::Open => write!(f, "open"),
            FeedStatus::Closed => write!(f, "closed"),
            FeedStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// One level of the illustrative order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookItem {
    pub price: f64,
    pub qty: f64,
    /// Cumulative quantity from the top of the book.
    pub total: f64,
}

/// Illustrative book around the last price. Not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    /// Best bid first.
    pub buy: Vec<OrderBookItem>,
    /// Highest ask first, best ask last.
    pub sell: Vec<OrderBookItem>,
}

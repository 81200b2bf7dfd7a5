//! Finnhub REST client for quote snapshots.
//!
//! Local symbols are keyed to Binance spot pairs on Finnhub's crypto feed.

use crate::services::{FeedError, QuoteSource};
use crate::types::Quote;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

/// Local symbol to Finnhub instrument identifier.
pub const COIN_MAPPING: &[(&str, &str)] = &[
    ("BTC", "BINANCE:BTCUSDT"),
    ("ETH", "BINANCE:ETHUSDT"),
    ("SOL", "BINANCE:SOLUSDT"),
    ("BNB", "BINANCE:BNBUSDT"),
    ("XRP", "BINANCE:XRPUSDT"),
    ("ADA", "BINANCE:ADAUSDT"),
    ("DOGE", "BINANCE:DOGEUSDT"),
    ("DOT", "BINANCE:DOTUSDT"),
];

const NAMES: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("SOL", "Solana"),
    ("BNB", "Binance Coin"),
    ("XRP", "Ripple"),
    ("ADA", "Cardano"),
    ("DOGE", "Dogecoin"),
    ("DOT", "Polkadot"),
];

/// Finnhub identifier for a local symbol. Unmapped symbols fall back to the
/// `BINANCE:<SYMBOL>USDT` convention.
pub fn upstream_symbol(symbol: &str) -> String {
    COIN_MAPPING
        .iter()
        .find(|(local, _)| *local == symbol)
        .map(|(_, upstream)| upstream.to_string())
        .unwrap_or_else(|| format!("BINANCE:{}USDT", symbol))
}

/// Reverse lookup of [`upstream_symbol`].
pub fn local_symbol(upstream: &str) -> Option<String> {
    if let Some((local, _)) = COIN_MAPPING.iter().find(|(_, u)| *u == upstream) {
        return Some(local.to_string());
    }
    upstream
        .strip_prefix("BINANCE:")
        .and_then(|pair| pair.strip_suffix("USDT"))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn display_name(symbol: &str) -> String {
    NAMES
        .iter()
        .find(|(local, _)| *local == symbol)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| symbol.to_string())
}

/// Finnhub quote response. Every field is optional; an errored quote comes
/// back as zeros or as an error object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinnhubQuote {
    /// Current price
    #[serde(rename = "c", default)]
    pub current: Option<f64>,
    /// Percent change
    #[serde(rename = "dp", default)]
    pub change_percent: Option<f64>,
    /// High price of the day
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    /// Low price of the day
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
}

impl FinnhubQuote {
    /// Convert to a [`Quote`]. A missing or zero day high/low falls back to
    /// the current price.
    pub fn into_quote(self, symbol: &str) -> Result<Quote, FeedError> {
        let price = self
            .current
            .filter(|c| c.is_finite() && *c > 0.0)
            .ok_or_else(|| FeedError::UpstreamUnavailable(format!("no price for {}", symbol)))?;

        let or_price = |v: Option<f64>| v.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(price);

        Ok(Quote {
            price,
            change_percent: self.change_percent.filter(|v| v.is_finite()).unwrap_or(0.0),
            high: or_price(self.high),
            low: or_price(self.low),
        })
    }
}

/// Finnhub API client.
pub struct FinnhubClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl FinnhubClient {
    /// Create a new Finnhub client.
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get a quote for a local symbol.
    pub async fn get_quote(&self, symbol: &str) -> Result<FinnhubQuote, FeedError> {
        let url = format!(
            "{}/quote?symbol={}&token={}",
            self.base_url,
            upstream_symbol(symbol),
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::UpstreamUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!("Finnhub quote for {} returned {}", symbol, response.status());
            return Err(FeedError::UpstreamUnavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let quote = response
            .json::<FinnhubQuote>()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        debug!("Finnhub quote {}: {:?}", symbol, quote);
        Ok(quote)
    }
}

impl QuoteSource for FinnhubClient {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, FeedError> {
        self.get_quote(symbol).await?.into_quote(symbol)
    }

    fn display_name(&self, symbol: &str) -> String {
        display_name(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping_round_trip() {
        for (local, upstream) in COIN_MAPPING {
            assert_eq!(upstream_symbol(local), *upstream);
            assert_eq!(local_symbol(upstream).as_deref(), Some(*local));
        }
    }

    #[test]
    fn test_unmapped_symbol_convention() {
        assert_eq!(upstream_symbol("LINK"), "BINANCE:LINKUSDT");
        assert_eq!(local_symbol("BINANCE:LINKUSDT").as_deref(), Some("LINK"));
        assert_eq!(local_symbol("AAPL"), None);
        assert_eq!(local_symbol("BINANCE:USDT"), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("BNB"), "Binance Coin");
        assert_eq!(display_name("LINK"), "LINK");
    }

    #[test]
    fn test_quote_high_low_fallback() {
        let raw: FinnhubQuote = serde_json::from_str(r#"{"c": 100.5, "dp": -1.2, "h": 0, "l": null}"#).unwrap();
        let quote = raw.into_quote("BTC").unwrap();
        assert_eq!(quote.price, 100.5);
        assert_eq!(quote.change_percent, -1.2);
        assert_eq!(quote.high, 100.5);
        assert_eq!(quote.low, 100.5);
    }

    #[test]
    fn test_quote_without_price_is_unavailable() {
        let raw: FinnhubQuote = serde_json::from_str(r#"{"error": "Invalid API key"}"#).unwrap();
        assert!(matches!(
            raw.into_quote("BTC"),
            Err(FeedError::UpstreamUnavailable(_))
        ));

        let zero: FinnhubQuote = serde_json::from_str(r#"{"c": 0, "dp": null, "h": 0, "l": 0}"#).unwrap();
        assert!(zero.into_quote("ETH").is_err());
    }
}

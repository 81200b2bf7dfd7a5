//! Finnhub WebSocket stream of crypto trade ticks.
//!
//! Subscribes to every tracked instrument and feeds trades into the
//! [`MarketFeed`]. Liveness is published through the feed's status channel.

use crate::services::MarketFeed;
use crate::sources::finnhub::{local_symbol, upstream_symbol};
use crate::types::{FeedStatus, PriceTick};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Finnhub WebSocket subscribe message.
#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    symbol: &'a str,
}

/// Finnhub trade data.
#[derive(Debug, Deserialize)]
struct TradeData {
    /// Symbol
    s: String,
    /// Price
    p: f64,
    /// Timestamp (milliseconds)
    t: i64,
    /// Volume
    #[serde(default)]
    v: Option<f64>,
}

/// Finnhub WebSocket message.
#[derive(Debug, Deserialize)]
struct FinnhubMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: Vec<TradeData>,
}

/// Decode one inbound frame into ticks keyed by local symbol.
///
/// Malformed payloads, non-trade messages and unmapped instruments yield
/// nothing.
pub fn parse_trade_message(text: &str) -> Vec<PriceTick> {
    let msg: FinnhubMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };

    if msg.msg_type != "trade" {
        return Vec::new();
    }

    msg.data
        .into_iter()
        .filter_map(|trade| {
            let symbol = local_symbol(&trade.s)?;
            Some(PriceTick {
                symbol,
                price: trade.p,
                timestamp: trade.t,
                volume: trade.v,
            })
        })
        .collect()
}

/// Finnhub WebSocket client feeding a [`MarketFeed`].
#[derive(Clone)]
pub struct FinnhubStream {
    api_key: String,
    ws_url: String,
    feed: Arc<MarketFeed>,
    reconnect: Option<Duration>,
}

impl FinnhubStream {
    /// Create a new stream. A `reconnect_secs` of 0 runs a single connection.
    pub fn new(api_key: String, ws_url: String, feed: Arc<MarketFeed>, reconnect_secs: u64) -> Self {
        Self {
            api_key,
            ws_url,
            feed,
            reconnect: (reconnect_secs > 0).then(|| Duration::from_secs(reconnect_secs)),
        }
    }

    /// Connect and keep streaming until the feed shuts down.
    pub async fn run(&self) {
        loop {
            if self.feed.is_closed() {
                break;
            }

            match self.run_connection().await {
                Ok(_) => {
                    warn!("Finnhub WebSocket disconnected");
                    self.feed.set_status(FeedStatus::Closed);
                }
                Err(e) => {
                    error!("Finnhub WebSocket error: {}", e);
                    self.feed.set_status(FeedStatus::Error(e.to_string()));
                }
            }

            let Some(delay) = self.reconnect else {
                break;
            };
            if self.feed.is_closed() {
                break;
            }
            info!("Reconnecting to Finnhub in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_connection(&self) -> anyhow::Result<()> {
        let url = format!("{}?token={}", self.ws_url, self.api_key);
        self.feed.set_status(FeedStatus::Connecting);
        info!("Connecting to Finnhub WebSocket");

        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();
        info!("Connected to Finnhub WebSocket");

        let symbols = self.feed.symbols();
        for symbol in &symbols {
            let upstream = upstream_symbol(symbol);
            let json = serde_json::to_string(&SubscribeMessage {
                msg_type: "subscribe",
                symbol: &upstream,
            })?;
            write.send(Message::Text(json)).await?;
        }
        info!("Subscribed to {} instruments via Finnhub WebSocket", symbols.len());
        self.feed.set_status(FeedStatus::Open);

        let mut status = self.feed.watch_status();
        let mut ping = tokio::time::interval(Duration::from_secs(30));
        ping.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Finnhub WebSocket closed");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            break;
                        }
                        _ => {}
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() || self.feed.is_closed() {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
                // Send ping every 30 seconds to keep connection alive
                _ = ping.tick() => {
                    let _ = write.send(Message::Ping(vec![])).await;
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str) {
        for tick in parse_trade_message(text) {
            let symbol = tick.symbol.clone();
            if !self.feed.on_tick(tick) {
                debug!("Dropped Finnhub tick for {}", symbol);
            }
        }
    }
}

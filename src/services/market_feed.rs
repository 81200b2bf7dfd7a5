//! Live market view for the tracked instruments.
//!
//! A one-shot snapshot fetch seeds every instrument, then the streaming
//! subscription feeds trade ticks through [`MarketFeed::on_tick`]. Each quote
//! lives in its own `DashMap` entry: a tick mutates the entry under its write
//! guard and readers clone under the read guard, so a quote is never observed
//! half-updated.

use crate::config::FeedConfig;
use crate::services::price_history::PriceHistoryBuffer;
use crate::types::{FeedStatus, MarketData, PriceTick, Quote};
use dashmap::DashMap;
use futures_util::future::join_all;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const SEED_INTERVAL_MS: i64 = 60_000;
const SEED_JITTER: f64 = 0.01;

/// Market data errors.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream payload: {0}")]
    Decode(String),
}

/// Source of one-shot quote snapshots.
pub trait QuoteSource: Send + Sync {
    /// Fetch the current quote for a local symbol.
    fn fetch_quote(&self, symbol: &str) -> impl Future<Output = Result<Quote, FeedError>> + Send;

    /// Human readable instrument name.
    fn display_name(&self, symbol: &str) -> String {
        symbol.to_string()
    }
}

#[derive(Debug, Clone)]
struct InstrumentState {
    name: String,
    price: f64,
    change_24h: f64,
    volume: f64,
    high_24h: f64,
    low_24h: f64,
    history: PriceHistoryBuffer,
}

impl InstrumentState {
    fn empty(name: String, capacity: usize) -> Self {
        Self {
            name,
            price: 0.0,
            change_24h: 0.0,
            volume: 0.0,
            high_24h: 0.0,
            low_24h: 0.0,
            history: PriceHistoryBuffer::new(capacity),
        }
    }

    /// Widen the high/low band. A band that never saw a price starts at it.
    fn widen(&mut self, price: f64) {
        self.high_24h = if self.high_24h > 0.0 { self.high_24h.max(price) } else { price };
        self.low_24h = if self.low_24h > 0.0 { self.low_24h.min(price) } else { price };
    }

    fn to_market_data(&self, symbol: &str) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            name: self.name.clone(),
            price: self.price,
            change_24h: self.change_24h,
            volume: self.volume,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            history: self.history.to_vec(),
        }
    }
}

/// Owner of the in-memory market view.
pub struct MarketFeed {
    quotes: DashMap<String, InstrumentState>,
    /// Tracked symbols in configuration order.
    symbols: RwLock<Vec<String>>,
    history_capacity: usize,
    seed_samples: usize,
    status_tx: watch::Sender<FeedStatus>,
    tick_tx: broadcast::Sender<PriceTick>,
    closed: AtomicBool,
}

impl MarketFeed {
    /// Create an empty feed.
    pub fn new(config: &FeedConfig) -> Arc<Self> {
        let (status_tx, _) = watch::channel(FeedStatus::Idle);
        let (tick_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            quotes: DashMap::new(),
            symbols: RwLock::new(Vec::new()),
            history_capacity: config.history_capacity,
            seed_samples: config.seed_samples,
            status_tx,
            tick_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Fetch one snapshot per symbol and seed the market view.
    ///
    /// A failed fetch leaves that instrument zeroed instead of failing the
    /// whole initialization.
    pub async fn initialize<S: QuoteSource>(&self, source: &S, symbols: &[String]) {
        self.set_status(FeedStatus::Initializing);

        for symbol in symbols {
            self.register(symbol, source.display_name(symbol));
        }

        let fetches = symbols.iter().map(|symbol| async move {
            (symbol.as_str(), source.fetch_quote(symbol).await)
        });
        let results = join_all(fetches).await;

        let mut seeded = 0;
        for (symbol, result) in results {
            match result {
                Ok(quote) if quote.price > 0.0 && quote.price.is_finite() => {
                    self.seed(symbol, &quote, chrono::Utc::now().timestamp_millis());
                    seeded += 1;
                }
                Ok(_) => {
                    warn!("Snapshot for {} carried no price, keeping zeroed quote", symbol);
                }
                Err(e) => {
                    warn!("Snapshot fetch for {} failed: {}", symbol, e);
                }
            }
        }

        info!("Market feed initialized: {}/{} instruments seeded", seeded, symbols.len());
        self.set_status(FeedStatus::Idle);
    }

    /// Start tracking `symbol` with a zeroed quote.
    pub fn register(&self, symbol: &str, name: String) {
        let mut symbols = self.symbols.write().unwrap_or_else(PoisonError::into_inner);
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
        drop(symbols);

        self.quotes
            .entry(symbol.to_string())
            .or_insert_with(|| InstrumentState::empty(name, self.history_capacity));
    }

    /// Merge a snapshot quote into the view.
    ///
    /// Synthetic samples are laid out backwards from `now` so a chart can
    /// render immediately. Ticks that already arrived while the snapshot was
    /// in flight keep their price and samples.
    pub fn seed(&self, symbol: &str, quote: &Quote, now: i64) {
        let Some(mut entry) = self.quotes.get_mut(symbol) else {
            debug!("Ignoring snapshot for untracked {}", symbol);
            return;
        };
        let state = entry.value_mut();

        let live: Vec<_> = state.history.to_vec();
        let cutoff = live.first().map(|p| p.time).unwrap_or(i64::MAX);

        let mut history = PriceHistoryBuffer::new(self.history_capacity);
        let mut rng = rand::thread_rng();
        let n = self.seed_samples as i64;
        for i in 0..n {
            let time = now - (n - i) * SEED_INTERVAL_MS;
            if time >= cutoff {
                break;
            }
            let jitter = 1.0 + (rng.gen::<f64>() - 0.5) * SEED_JITTER;
            history.push(time, quote.price * jitter);
        }

        if live.is_empty() {
            history.push(now, quote.price);
            state.price = quote.price;
        } else {
            for point in &live {
                history.push(point.time, point.price);
            }
        }

        state.history = history;
        state.change_24h = quote.change_percent;
        let high = if quote.high > 0.0 { quote.high } else { quote.price };
        let low = if quote.low > 0.0 { quote.low } else { quote.price };
        state.widen(high);
        state.widen(low);
        state.widen(state.price);
    }

    /// Apply one trade tick. Returns whether the tick was applied.
    ///
    /// Ticks for untracked symbols, non-positive prices, or ticks arriving
    /// after [`shutdown`](Self::shutdown) are dropped.
    pub fn on_tick(&self, tick: PriceTick) -> bool {
        if self.is_closed() {
            return false;
        }
        if !tick.price.is_finite() || tick.price <= 0.0 {
            return false;
        }

        {
            let Some(mut entry) = self.quotes.get_mut(&tick.symbol) else {
                return false;
            };
            let state = entry.value_mut();
            state.history.push(tick.timestamp, tick.price);
            state.price = tick.price;
            state.widen(tick.price);
            if let Some(volume) = tick.volume.filter(|v| v.is_finite() && *v > 0.0) {
                state.volume += volume;
            }
        }

        debug!("Tick {} = {:.4}", tick.symbol, tick.price);
        // Ignore errors if no receivers
        let _ = self.tick_tx.send(tick);
        true
    }

    /// Snapshot of every tracked quote keyed by symbol.
    pub fn market_view(&self) -> HashMap<String, MarketData> {
        self.quotes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_market_data(entry.key())))
            .collect()
    }

    /// Tracked quotes in configuration order.
    pub fn quotes(&self) -> Vec<MarketData> {
        self.symbols()
            .iter()
            .filter_map(|symbol| self.quote(symbol).ok())
            .collect()
    }

    pub fn quote(&self, symbol: &str) -> Result<MarketData, FeedError> {
        self.quotes
            .get(symbol)
            .map(|entry| entry.value().to_market_data(symbol))
            .ok_or_else(|| FeedError::UnknownInstrument(symbol.to_string()))
    }

    /// Last price, `None` for untracked or never-priced instruments.
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.quotes
            .get(symbol)
            .map(|entry| entry.price)
            .filter(|p| *p > 0.0)
    }

    /// Last prices of every instrument that has one.
    pub fn prices(&self) -> HashMap<String, f64> {
        self.quotes
            .iter()
            .filter(|entry| entry.price > 0.0)
            .map(|entry| (entry.key().clone(), entry.price))
            .collect()
    }

    /// Instruments with the largest absolute 24h change.
    pub fn top_movers(&self, limit: usize) -> Vec<MarketData> {
        let mut quotes = self.quotes();
        quotes.sort_by(|a, b| b.change_24h.abs().total_cmp(&a.change_24h.abs()));
        quotes.truncate(limit);
        quotes
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.quotes.contains_key(symbol)
    }

    /// Receive every applied tick.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceTick> {
        self.tick_tx.subscribe()
    }

    pub fn status(&self) -> FeedStatus {
        self.status_tx.borrow().clone()
    }

    /// Observe liveness changes of the feed and its stream.
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    pub fn set_status(&self, status: FeedStatus) {
        if self.is_closed() && status != FeedStatus::Closed {
            return;
        }
        debug!("Market feed status: {}", status);
        self.status_tx.send_replace(status);
    }

    /// Tear the feed down. Later ticks are discarded.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.status_tx.send_replace(FeedStatus::Closed);
        info!("Market feed shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

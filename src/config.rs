use std::env;

/// Instruments tracked when `TRACKED_SYMBOLS` is not set.
pub const DEFAULT_SYMBOLS: &[&str] = &["BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "DOT"];

/// Longest demo trial accepted from `DEMO_TRIAL_DAYS`.
pub const MAX_TRIAL_DAYS: i64 = 3_650;

/// Market feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Finnhub API key. Without it the feed serves zeroed quotes only.
    pub finnhub_api_key: Option<String>,
    /// Finnhub REST base URL.
    pub rest_url: String,
    /// Finnhub WebSocket URL (token appended at connect time).
    pub ws_url: String,
    /// Local symbols to track.
    pub symbols: Vec<String>,
    /// Samples retained per instrument.
    pub history_capacity: usize,
    /// Synthetic samples seeded behind a fetched snapshot price.
    pub seed_samples: usize,
    /// Delay before restarting a dropped stream (0 = do not restart).
    pub reconnect_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            finnhub_api_key: None,
            rest_url: "https://finnhub.io/api/v1".to_string(),
            ws_url: "wss://ws.finnhub.io".to_string(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            history_capacity: 50,
            seed_samples: 20,
            reconnect_secs: 5,
        }
    }
}

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Lowest accepted leverage multiplier.
    pub min_leverage: f64,
    /// Highest accepted leverage multiplier.
    pub max_leverage: f64,
    /// Demo balance granted when an account is opened.
    pub demo_starting_balance: f64,
    /// Demo trial length in days.
    pub demo_trial_days: i64,
    /// Symbols orders may be placed on. Empty accepts any symbol.
    pub instruments: Vec<String>,
    /// Seconds before an untouched account's cached view is dropped (0 = never).
    pub idle_eviction_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_leverage: 1.0,
            max_leverage: 200.0,
            demo_starting_balance: 10_000.0,
            demo_trial_days: 3,
            instruments: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            idle_eviction_secs: 900,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite file for the account store (in-memory store when unset).
    pub database_path: Option<String>,
    pub feed: FeedConfig,
    pub ledger: LedgerConfig,
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let feed_defaults = FeedConfig::default();
        let ledger_defaults = LedgerConfig::default();

        let symbols = env::var("TRACKED_SYMBOLS")
            .ok()
            .map(|s| parse_symbols(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or(feed_defaults.symbols);

        let feed = FeedConfig {
            finnhub_api_key: env::var("FINNHUB_API_KEY").ok().filter(|k| !k.is_empty()),
            rest_url: env::var("FINNHUB_REST_URL").unwrap_or(feed_defaults.rest_url),
            ws_url: env::var("FINNHUB_WS_URL").unwrap_or(feed_defaults.ws_url),
            symbols: symbols.clone(),
            history_capacity: env_parse("HISTORY_CAPACITY").unwrap_or(feed_defaults.history_capacity),
            seed_samples: env_parse("SEED_HISTORY_SAMPLES").unwrap_or(feed_defaults.seed_samples),
            reconnect_secs: env_parse("STREAM_RECONNECT_SECS").unwrap_or(feed_defaults.reconnect_secs),
        };

        let ledger = LedgerConfig {
            min_leverage: ledger_defaults.min_leverage,
            max_leverage: env_parse::<f64>("MAX_LEVERAGE")
                .filter(|l| *l >= 1.0)
                .unwrap_or(ledger_defaults.max_leverage),
            demo_starting_balance: env_parse::<f64>("DEMO_STARTING_BALANCE")
                .filter(|b| *b >= 0.0)
                .unwrap_or(ledger_defaults.demo_starting_balance),
            demo_trial_days: env_parse::<i64>("DEMO_TRIAL_DAYS")
                .filter(|d| (0..=MAX_TRIAL_DAYS).contains(d))
                .unwrap_or(ledger_defaults.demo_trial_days),
            instruments: symbols,
            idle_eviction_secs: env_parse("ACCOUNT_IDLE_SECS").unwrap_or(ledger_defaults.idle_eviction_secs),
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT").unwrap_or(3001),
            database_path: env::var("DATABASE_PATH").ok().filter(|p| !p.is_empty()),
            feed,
            ledger,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_path: None,
            feed: FeedConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

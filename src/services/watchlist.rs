//! Per-user watchlists.
//!
//! Ordered, duplicate-free symbol lists persisted through the account store.
//! Like the ledger, the cached lists only change by replaying store events.

use crate::services::account_store::{AccountStore, StoreError};
use crate::types::{StoreEvent, WriteBatch, WriteOp};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Watchlist shown until the user stores one.
pub const DEFAULT_WATCHLIST: &[&str] = &["BTC", "ETH", "SOL"];

#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Store read failed: {0}")]
    StoreReadFailed(#[from] StoreError),
}

pub struct WatchlistStore {
    store: Arc<dyn AccountStore>,
    lists: DashMap<String, Vec<String>>,
    events: Mutex<broadcast::Receiver<StoreEvent>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WatchlistStore {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        let events = Mutex::new(store.subscribe());
        Self {
            store,
            lists: DashMap::new(),
            events,
            locks: DashMap::new(),
        }
    }

    /// The user's watchlist in insertion order.
    pub fn get(&self, uid: &str) -> Result<Vec<String>, WatchlistError> {
        // Held through the store read so a replay cannot land between the
        // read and the insert
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        self.replay(&mut events);
        if let Some(list) = self.lists.get(uid) {
            return Ok(list.clone());
        }

        let list = self
            .store
            .watchlist(uid)?
            .unwrap_or_else(|| DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect());
        self.lists.insert(uid.to_string(), list.clone());
        Ok(list)
    }

    /// Append `symbol`. Adding a symbol already present changes nothing.
    pub fn add(&self, uid: &str, symbol: &str) -> Result<Vec<String>, WatchlistError> {
        let symbol = normalize(symbol)?;
        self.update(uid, |list| {
            if list.contains(&symbol) {
                return false;
            }
            list.push(symbol.clone());
            true
        })
    }

    pub fn remove(&self, uid: &str, symbol: &str) -> Result<Vec<String>, WatchlistError> {
        let symbol = normalize(symbol)?;
        self.update(uid, |list| {
            let before = list.len();
            list.retain(|s| *s != symbol);
            list.len() != before
        })
    }

    pub fn contains(&self, uid: &str, symbol: &str) -> Result<bool, WatchlistError> {
        let symbol = normalize(symbol)?;
        Ok(self.get(uid)?.contains(&symbol))
    }

    /// Replay watchlist writes pushed by the store.
    pub fn sync(&self) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        self.replay(&mut events);
    }

    fn replay(&self, events: &mut broadcast::Receiver<StoreEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    for op in &event.ops {
                        if let WriteOp::SetWatchlist { symbols } = op {
                            debug!("Watchlist of {} changed", event.user_id);
                            self.lists.insert(event.user_id.clone(), symbols.clone());
                        }
                    }
                }
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Watchlist view missed {} store events, reloading", n);
                    self.lists.clear();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn update(
        &self,
        uid: &str,
        change: impl FnOnce(&mut Vec<String>) -> bool,
    ) -> Result<Vec<String>, WatchlistError> {
        let lock = self.locks.entry(uid.to_string()).or_default().clone();
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut list = self.get(uid)?;
        if !change(&mut list) {
            return Ok(list);
        }

        let mut batch = WriteBatch::new(uid);
        batch.push(WriteOp::SetWatchlist {
            symbols: list.clone(),
        });
        self.store
            .commit(batch)
            .map_err(|e| WatchlistError::StoreWriteFailed(e.to_string()))?;
        self.sync();

        info!("Watchlist of {} is now {:?}", uid, list);
        Ok(list)
    }
}

fn normalize(symbol: &str) -> Result<String, WatchlistError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(WatchlistError::InvalidSymbol(symbol));
    }
    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" btc ").unwrap(), "BTC");
        assert!(normalize("").is_err());
        assert!(normalize("BTC/USDT").is_err());
    }
}

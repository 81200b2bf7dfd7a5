//! Integration tests for watchlists
//!
//! Tests cover:
//! - Default list for new users
//! - Adding, deduplicating and removing symbols
//! - Persistence across store instances and sessions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use wisecrypto::services::{
    AccountStore, MemoryStore, SqliteAccountStore, StoreError, WatchlistError, WatchlistStore,
    DEFAULT_WATCHLIST,
};
use wisecrypto::types::*;

fn defaults() -> Vec<String> {
    DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect()
}

/// Store whose first watchlist read returns late.
struct SlowReadStore {
    inner: MemoryStore,
    delayed: AtomicBool,
}

impl SlowReadStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            delayed: AtomicBool::new(false),
        }
    }
}

impl AccountStore for SlowReadStore {
    fn balances(&self, user_id: &str) -> Result<Balances, StoreError> {
        self.inner.balances(user_id)
    }

    fn positions(&self, user_id: &str, account: AccountType) -> Result<Vec<Asset>, StoreError> {
        self.inner.positions(user_id, account)
    }

    fn trades(&self, user_id: &str) -> Result<Vec<Trade>, StoreError> {
        self.inner.trades(user_id)
    }

    fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        self.inner.notifications(user_id)
    }

    fn watchlist(&self, user_id: &str) -> Result<Option<Vec<String>>, StoreError> {
        let list = self.inner.watchlist(user_id);
        if !self.delayed.swap(true, Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(300));
        }
        list
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        self.inner.profile(user_id)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.inner.commit(batch)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

// =============================================================================
// Watchlist Tests
// =============================================================================

mod watchlist_tests {
    use super::*;

    #[test]
    fn test_new_user_gets_default_list() {
        let watchlist = WatchlistStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(watchlist.get("u1").unwrap(), vec!["BTC", "ETH", "SOL"]);
        assert!(watchlist.contains("u1", "eth").unwrap());
    }

    #[test]
    fn test_add_appends_once() {
        let watchlist = WatchlistStore::new(Arc::new(MemoryStore::new()));

        let list = assert_ok!(watchlist.add("u1", "doge"));
        assert_eq!(list, vec!["BTC", "ETH", "SOL", "DOGE"]);

        let again = assert_ok!(watchlist.add("u1", " DOGE "));
        assert_eq!(again, list);
    }

    #[test]
    fn test_remove_keeps_order() {
        let watchlist = WatchlistStore::new(Arc::new(MemoryStore::new()));
        watchlist.add("u1", "ADA").unwrap();

        let list = assert_ok!(watchlist.remove("u1", "ETH"));
        assert_eq!(list, vec!["BTC", "SOL", "ADA"]);

        let unchanged = assert_ok!(watchlist.remove("u1", "XRP"));
        assert_eq!(unchanged, list);
    }

    #[test]
    fn test_rejects_malformed_symbols() {
        let watchlist = WatchlistStore::new(Arc::new(MemoryStore::new()));
        let err = assert_err!(watchlist.add("u1", "  "));
        assert!(matches!(err, WatchlistError::InvalidSymbol(_)));
        assert!(matches!(
            watchlist.add("u1", "BTC/USD"),
            Err(WatchlistError::InvalidSymbol(_))
        ));
        assert_eq!(watchlist.get("u1").unwrap(), defaults());
    }

    #[test]
    fn test_lists_are_per_user() {
        let watchlist = WatchlistStore::new(Arc::new(MemoryStore::new()));
        watchlist.add("u1", "DOT").unwrap();
        assert_eq!(watchlist.get("u2").unwrap(), defaults());
    }
}

// =============================================================================
// Persistence Tests
// =============================================================================

mod persistence_tests {
    use super::*;

    #[test]
    fn test_list_survives_new_instance() {
        let store: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::new_in_memory().unwrap());
        WatchlistStore::new(store.clone()).add("u1", "XRP").unwrap();

        let reopened = WatchlistStore::new(store.clone());
        assert_eq!(reopened.get("u1").unwrap(), vec!["BTC", "ETH", "SOL", "XRP"]);
        assert_eq!(
            store.watchlist("u1").unwrap(),
            Some(vec![
                "BTC".to_string(),
                "ETH".to_string(),
                "SOL".to_string(),
                "XRP".to_string()
            ])
        );
    }

    #[test]
    fn test_other_session_changes_are_visible() {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryStore::new());
        let first = WatchlistStore::new(store.clone());
        let second = WatchlistStore::new(store);

        assert_eq!(second.get("u1").unwrap(), defaults());
        first.remove("u1", "BTC").unwrap();

        assert_eq!(second.get("u1").unwrap(), vec!["ETH", "SOL"]);
        assert!(!second.contains("u1", "BTC").unwrap());
    }

    #[test]
    fn test_slow_read_does_not_undo_add() {
        let store = Arc::new(SlowReadStore::new());
        let watchlist = Arc::new(WatchlistStore::new(store.clone()));

        let reader = {
            let watchlist = watchlist.clone();
            thread::spawn(move || watchlist.get("u1").unwrap())
        };
        thread::sleep(Duration::from_millis(50));

        assert_eq!(watchlist.add("u1", "ADA").unwrap(), vec!["BTC", "ETH", "SOL", "ADA"]);
        reader.join().unwrap();

        assert_eq!(watchlist.get("u1").unwrap(), vec!["BTC", "ETH", "SOL", "ADA"]);
        assert_eq!(watchlist.add("u1", "DOT").unwrap(), vec!["BTC", "ETH", "SOL", "ADA", "DOT"]);
        assert_eq!(
            store.watchlist("u1").unwrap().unwrap(),
            vec!["BTC", "ETH", "SOL", "ADA", "DOT"]
        );
    }

    #[test]
    fn test_reloads_after_missing_events() {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryStore::new());
        let watchlist = WatchlistStore::new(store.clone());
        assert_eq!(watchlist.get("u1").unwrap(), defaults());

        for i in 0..1_500 {
            let mut batch = WriteBatch::new("u1");
            batch.push(WriteOp::SetWatchlist {
                symbols: vec![format!("C{}", i)],
            });
            store.commit(batch).unwrap();
        }

        assert_eq!(watchlist.get("u1").unwrap(), vec!["C1499"]);
        assert!(watchlist.contains("u1", "C1499").unwrap());
    }
}

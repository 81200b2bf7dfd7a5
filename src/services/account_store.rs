//! Account store interface and in-memory implementation.
//!
//! The store is the source of truth for balances, positions, trade and
//! notification logs, watchlists and profiles. Writes arrive as a
//! [`WriteBatch`] applied all-or-nothing, and every committed batch is pushed
//! to subscribers as a [`StoreEvent`].

use crate::types::{
    AccountType, Asset, Balances, Notification, StoreEvent, Trade, UserProfile, WriteBatch, WriteOp,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key-path store holding every user's account records.
pub trait AccountStore: Send + Sync {
    fn balances(&self, user_id: &str) -> Result<Balances, StoreError>;

    fn positions(&self, user_id: &str, account: AccountType) -> Result<Vec<Asset>, StoreError>;

    /// Trades in append order.
    fn trades(&self, user_id: &str) -> Result<Vec<Trade>, StoreError>;

    /// Notifications in append order.
    fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, StoreError>;

    /// `None` when the user never stored a watchlist.
    fn watchlist(&self, user_id: &str) -> Result<Option<Vec<String>>, StoreError>;

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Apply every op in the batch atomically, then publish it as a
    /// [`StoreEvent`]. Events are published in commit order.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Receive every committed batch, from any session.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// All records of one user.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub balances: Balances,
    pub demo_positions: BTreeMap<String, Asset>,
    pub live_positions: BTreeMap<String, Asset>,
    pub trades: Vec<Trade>,
    pub notifications: Vec<Notification>,
    pub watchlist: Option<Vec<String>>,
    pub profile: Option<UserProfile>,
}

impl UserRecord {
    pub fn positions(&self, account: AccountType) -> &BTreeMap<String, Asset> {
        match account {
            AccountType::Demo => &self.demo_positions,
            AccountType::Live => &self.live_positions,
        }
    }

    pub fn positions_mut(&mut self, account: AccountType) -> &mut BTreeMap<String, Asset> {
        match account {
            AccountType::Demo => &mut self.demo_positions,
            AccountType::Live => &mut self.live_positions,
        }
    }

    /// Apply one op. Re-applying the same op is a no-op.
    pub fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::SetBalance { account, amount } => self.balances.set(*account, *amount),
            WriteOp::SetPosition { account, asset } => {
                self.positions_mut(*account)
                    .insert(asset.symbol.clone(), asset.clone());
            }
            WriteOp::DeletePosition { account, symbol } => {
                self.positions_mut(*account).remove(symbol);
            }
            WriteOp::AppendTrade { trade } => {
                if !self.trades.iter().any(|t| t.id == trade.id) {
                    self.trades.push(trade.clone());
                }
            }
            WriteOp::AppendNotification { notification } => {
                if !self.notifications.iter().any(|n| n.id == notification.id) {
                    self.notifications.push(notification.clone());
                }
            }
            WriteOp::MarkNotificationsRead { ids } => {
                for n in self.notifications.iter_mut() {
                    let selected = ids.as_ref().map_or(true, |ids| ids.contains(&n.id));
                    if selected {
                        n.read = true;
                    }
                }
            }
            WriteOp::SetWatchlist { symbols } => self.watchlist = Some(symbols.clone()),
            WriteOp::SetProfile { profile } => self.profile = Some(profile.clone()),
        }
    }

    pub fn apply_all(&mut self, ops: &[WriteOp]) {
        for op in ops {
            self.apply(op);
        }
    }
}

/// In-process store. Commits apply under one lock, so readers never see a
/// partially applied batch.
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
    tx: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            users: Mutex::new(HashMap::new()),
            tx,
        }
    }

    fn read<T>(&self, user_id: &str, f: impl FnOnce(&UserRecord) -> T) -> T
    where
        T: Default,
    {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        users.get(user_id).map(f).unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for MemoryStore {
    fn balances(&self, user_id: &str) -> Result<Balances, StoreError> {
        Ok(self.read(user_id, |u| u.balances))
    }

    fn positions(&self, user_id: &str, account: AccountType) -> Result<Vec<Asset>, StoreError> {
        Ok(self.read(user_id, |u| u.positions(account).values().cloned().collect()))
    }

    fn trades(&self, user_id: &str) -> Result<Vec<Trade>, StoreError> {
        Ok(self.read(user_id, |u| u.trades.clone()))
    }

    fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        Ok(self.read(user_id, |u| u.notifications.clone()))
    }

    fn watchlist(&self, user_id: &str) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.read(user_id, |u| u.watchlist.clone()))
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.read(user_id, |u| u.profile.clone()))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        users
            .entry(batch.user_id.clone())
            .or_default()
            .apply_all(&batch.ops);
        debug!("Committed {} ops for {}", batch.ops.len(), batch.user_id);

        // Sent under the lock so events keep commit order. Ignore errors if
        // no subscribers.
        let _ = self.tx.send(batch.into());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationType, OrderSide};

    fn asset(symbol: &str, quantity: f64) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            quantity,
            avg_price: 10.0,
            borrowed: 0.0,
        }
    }

    #[test]
    fn test_commit_applies_all_ops() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new("u1");
        batch
            .push(WriteOp::SetBalance {
                account: AccountType::Demo,
                amount: 500.0,
            })
            .push(WriteOp::SetPosition {
                account: AccountType::Demo,
                asset: asset("BTC", 1.0),
            });
        store.commit(batch).unwrap();

        assert_eq!(store.balances("u1").unwrap().demo, 500.0);
        assert_eq!(store.positions("u1", AccountType::Demo).unwrap().len(), 1);
        assert!(store.positions("u1", AccountType::Live).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_user_reads_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.balances("nobody").unwrap(), Balances::default());
        assert!(store.trades("nobody").unwrap().is_empty());
        assert!(store.watchlist("nobody").unwrap().is_none());
        assert!(store.profile("nobody").unwrap().is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut record = UserRecord::default();
        let trade = Trade::executed(OrderSide::Buy, "ETH", 1.0, 5.0, AccountType::Live, 1.0, 0);
        let op = WriteOp::AppendTrade { trade };
        record.apply(&op);
        record.apply(&op);
        assert_eq!(record.trades.len(), 1);
    }

    #[test]
    fn test_delete_position() {
        let mut record = UserRecord::default();
        record.apply(&WriteOp::SetPosition {
            account: AccountType::Live,
            asset: asset("SOL", 2.0),
        });
        record.apply(&WriteOp::DeletePosition {
            account: AccountType::Live,
            symbol: "SOL".to_string(),
        });
        assert!(record.live_positions.is_empty());
    }

    #[test]
    fn test_mark_notifications_read() {
        let mut record = UserRecord::default();
        let a = Notification::new(NotificationType::Order, "a", String::new(), 1);
        let b = Notification::new(NotificationType::System, "b", String::new(), 2);
        let a_id = a.id.clone();
        record.apply(&WriteOp::AppendNotification { notification: a });
        record.apply(&WriteOp::AppendNotification { notification: b });

        record.apply(&WriteOp::MarkNotificationsRead {
            ids: Some(vec![a_id]),
        });
        assert!(record.notifications[0].read);
        assert!(!record.notifications[1].read);

        record.apply(&WriteOp::MarkNotificationsRead { ids: None });
        assert!(record.notifications.iter().all(|n| n.read));
    }

    #[tokio::test]
    async fn test_commit_pushes_event() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let mut batch = WriteBatch::new("u2");
        batch.push(WriteOp::SetWatchlist {
            symbols: vec!["BTC".to_string()],
        });
        store.commit(batch).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "u2");
        assert_eq!(event.ops.len(), 1);
    }
}

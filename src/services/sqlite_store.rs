//! SQLite persistence for account records.
//!
//! Each [`WriteBatch`] runs inside one transaction, so a batch either lands
//! completely or not at all. Trade and notification bodies are stored as JSON
//! next to the columns we query on.

use crate::services::account_store::{AccountStore, StoreError};
use crate::types::{
    AccountType, Asset, Balances, Notification, StoreEvent, Trade, UserProfile, WriteBatch, WriteOp,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// SQLite-backed account store.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
    tx: broadcast::Sender<StoreEvent>,
}

impl SqliteAccountStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!("SQLite account store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self::with_connection(conn)?;
        debug!("In-memory SQLite account store initialized");
        Ok(store)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let (tx, _) = broadcast::channel(1024);
        let store = Self {
            conn: Mutex::new(conn),
            tx,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS profiles (
                uid TEXT PRIMARY KEY,
                profile_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS balances (
                user_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                amount REAL NOT NULL,
                PRIMARY KEY (user_id, account_type)
            );

            CREATE TABLE IF NOT EXISTS positions (
                user_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                avg_price REAL NOT NULL,
                borrowed REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, account_type, symbol)
            );

            CREATE TABLE IF NOT EXISTS trades (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                trade_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_user ON trades(user_id, seq);

            CREATE TABLE IF NOT EXISTS notifications (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                notification_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, seq);

            CREATE TABLE IF NOT EXISTS watchlists (
                user_id TEXT PRIMARY KEY,
                symbols_json TEXT NOT NULL
            );",
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    fn apply_op(tx: &Transaction<'_>, user_id: &str, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::SetBalance { account, amount } => {
                tx.execute(
                    "INSERT INTO balances (user_id, account_type, amount) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id, account_type) DO UPDATE SET amount = excluded.amount",
                    params![user_id, account.as_str(), amount],
                )?;
            }
            WriteOp::SetPosition { account, asset } => {
                tx.execute(
                    "INSERT INTO positions (user_id, account_type, symbol, quantity, avg_price, borrowed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id, account_type, symbol) DO UPDATE SET
                        quantity = excluded.quantity,
                        avg_price = excluded.avg_price,
                        borrowed = excluded.borrowed",
                    params![
                        user_id,
                        account.as_str(),
                        asset.symbol,
                        asset.quantity,
                        asset.avg_price,
                        asset.borrowed,
                    ],
                )?;
            }
            WriteOp::DeletePosition { account, symbol } => {
                tx.execute(
                    "DELETE FROM positions WHERE user_id = ?1 AND account_type = ?2 AND symbol = ?3",
                    params![user_id, account.as_str(), symbol],
                )?;
            }
            WriteOp::AppendTrade { trade } => {
                tx.execute(
                    "INSERT OR IGNORE INTO trades (id, user_id, timestamp, trade_json)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![trade.id, user_id, trade.timestamp, serde_json::to_string(trade)?],
                )?;
            }
            WriteOp::AppendNotification { notification } => {
                tx.execute(
                    "INSERT OR IGNORE INTO notifications (id, user_id, read, notification_json)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        notification.id,
                        user_id,
                        notification.read,
                        serde_json::to_string(notification)?,
                    ],
                )?;
            }
            WriteOp::MarkNotificationsRead { ids: None } => {
                tx.execute(
                    "UPDATE notifications SET read = 1 WHERE user_id = ?1",
                    params![user_id],
                )?;
            }
            WriteOp::MarkNotificationsRead { ids: Some(ids) } => {
                let mut stmt =
                    tx.prepare("UPDATE notifications SET read = 1 WHERE user_id = ?1 AND id = ?2")?;
                for id in ids {
                    stmt.execute(params![user_id, id])?;
                }
            }
            WriteOp::SetWatchlist { symbols } => {
                tx.execute(
                    "INSERT INTO watchlists (user_id, symbols_json) VALUES (?1, ?2)
                     ON CONFLICT(user_id) DO UPDATE SET symbols_json = excluded.symbols_json",
                    params![user_id, serde_json::to_string(symbols)?],
                )?;
            }
            WriteOp::SetProfile { profile } => {
                tx.execute(
                    "INSERT INTO profiles (uid, profile_json) VALUES (?1, ?2)
                     ON CONFLICT(uid) DO UPDATE SET profile_json = excluded.profile_json",
                    params![profile.uid, serde_json::to_string(profile)?],
                )?;
            }
        }
        Ok(())
    }
}

impl AccountStore for SqliteAccountStore {
    fn balances(&self, user_id: &str) -> Result<Balances, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT account_type, amount FROM balances WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut balances = Balances::default();
        for row in rows {
            let (account, amount) = row?;
            match AccountType::parse(&account) {
                Some(account) => balances.set(account, amount),
                None => error!("Unknown account type in balances table: {}", account),
            }
        }
        Ok(balances)
    }

    fn positions(&self, user_id: &str, account: AccountType) -> Result<Vec<Asset>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT symbol, quantity, avg_price, borrowed FROM positions
             WHERE user_id = ?1 AND account_type = ?2 ORDER BY symbol",
        )?;
        let positions = stmt
            .query_map(params![user_id, account.as_str()], |row| {
                Ok(Asset {
                    symbol: row.get(0)?,
                    quantity: row.get(1)?,
                    avg_price: row.get(2)?,
                    borrowed: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions)
    }

    fn trades(&self, user_id: &str) -> Result<Vec<Trade>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT trade_json FROM trades WHERE user_id = ?1 ORDER BY seq")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT notification_json, read FROM notifications WHERE user_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|(json, read)| -> Result<Notification, StoreError> {
                let mut notification: Notification = serde_json::from_str(json)?;
                notification.read = *read;
                Ok(notification)
            })
            .collect()
    }

    fn watchlist(&self, user_id: &str) -> Result<Option<Vec<String>>, StoreError> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT symbols_json FROM watchlists WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT profile_json FROM profiles WHERE uid = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for op in &batch.ops {
            // Dropping `tx` on error rolls the whole batch back
            Self::apply_op(&tx, &batch.user_id, op)?;
        }
        tx.commit()?;
        debug!("Committed {} ops for {}", batch.ops.len(), batch.user_id);

        // Sent while the connection is held so events keep commit order
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
    use crate::types::{KycStatus, NotificationType, OrderSide};

    fn store() -> SqliteAccountStore {
        SqliteAccountStore::new_in_memory().unwrap()
    }

    #[test]
    fn test_balances_round_trip() {
        let store = store();
        let mut batch = WriteBatch::new("u1");
        batch
            .push(WriteOp::SetBalance {
                account: AccountType::Demo,
                amount: 10_000.0,
            })
            .push(WriteOp::SetBalance {
                account: AccountType::Live,
                amount: 25.5,
            });
        store.commit(batch).unwrap();

        let balances = store.balances("u1").unwrap();
        assert_eq!(balances.demo, 10_000.0);
        assert_eq!(balances.live, 25.5);
        assert_eq!(store.balances("u2").unwrap(), Balances::default());
    }

    #[test]
    fn test_position_upsert_and_delete() {
        let store = store();
        let mut asset = Asset {
            symbol: "BTC".to_string(),
            quantity: 0.1,
            avg_price: 50_000.0,
            borrowed: 2_500.0,
        };
        let mut batch = WriteBatch::new("u1");
        batch.push(WriteOp::SetPosition {
            account: AccountType::Demo,
            asset: asset.clone(),
        });
        store.commit(batch).unwrap();

        asset.quantity = 0.2;
        let mut batch = WriteBatch::new("u1");
        batch.push(WriteOp::SetPosition {
            account: AccountType::Demo,
            asset: asset.clone(),
        });
        store.commit(batch).unwrap();

        let positions = store.positions("u1", AccountType::Demo).unwrap();
        assert_eq!(positions, vec![asset]);
        assert!(store.positions("u1", AccountType::Live).unwrap().is_empty());

        let mut batch = WriteBatch::new("u1");
        batch.push(WriteOp::DeletePosition {
            account: AccountType::Demo,
            symbol: "BTC".to_string(),
        });
        store.commit(batch).unwrap();
        assert!(store.positions("u1", AccountType::Demo).unwrap().is_empty());
    }

    #[test]
    fn test_trades_keep_append_order_and_dedupe() {
        let store = store();
        let first = Trade::executed(OrderSide::Buy, "ETH", 1.0, 3_000.0, AccountType::Live, 1.0, 20);
        let second = Trade::executed(OrderSide::Sell, "ETH", 1.0, 3_100.0, AccountType::Live, 1.0, 10);
        for trade in [&first, &second, &first] {
            let mut batch = WriteBatch::new("u1");
            batch.push(WriteOp::AppendTrade {
                trade: trade.clone(),
            });
            store.commit(batch).unwrap();
        }

        let trades = store.trades("u1").unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id, first.id);
        assert_eq!(trades[1].id, second.id);
    }

    #[test]
    fn test_notifications_read_flag() {
        let store = store();
        let n = Notification::new(NotificationType::Order, "Order Executed", "Bought".to_string(), 1);
        let mut batch = WriteBatch::new("u1");
        batch.push(WriteOp::AppendNotification { notification: n });
        store.commit(batch).unwrap();
        assert!(!store.notifications("u1").unwrap()[0].read);

        let mut batch = WriteBatch::new("u1");
        batch.push(WriteOp::MarkNotificationsRead { ids: None });
        store.commit(batch).unwrap();
        assert!(store.notifications("u1").unwrap()[0].read);
    }

    #[test]
    fn test_watchlist_and_profile() {
        let store = store();
        assert!(store.watchlist("u1").unwrap().is_none());
        assert!(store.profile("u1").unwrap().is_none());

        let profile = UserProfile {
            uid: "u1".to_string(),
            name: "Trader".to_string(),
            email: "t@example.com".to_string(),
            trading_id: "654321".to_string(),
            avatar: String::new(),
            kyc_status: KycStatus::Pending,
            created_at: 1,
            demo_expires_at: Some(2),
        };
        let mut batch = WriteBatch::new("u1");
        batch
            .push(WriteOp::SetWatchlist {
                symbols: vec!["BTC".to_string(), "DOT".to_string()],
            })
            .push(WriteOp::SetProfile {
                profile: profile.clone(),
            });
        store.commit(batch).unwrap();

        assert_eq!(
            store.watchlist("u1").unwrap(),
            Some(vec!["BTC".to_string(), "DOT".to_string()])
        );
        assert_eq!(store.profile("u1").unwrap(), Some(profile));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = store();
        let mut rx = store.subscribe();
        store.commit(WriteBatch::new("u1")).unwrap();
        assert!(rx.try_recv().is_err());
    }
}

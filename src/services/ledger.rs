//! Margin-trading ledger.
//!
//! The [`AccountStore`] is the source of truth. The ledger keeps a per-user
//! view that only changes by replaying store events in commit order, so a
//! write that fails never shows up locally and writes from other sessions
//! land the same way our own do.
//!
//! Mutations on one (user, account) pair are serialized; different accounts
//! proceed in parallel.

use crate::config::LedgerConfig;
use crate::services::account_store::{AccountStore, StoreError, UserRecord};
use crate::services::margin::{self, DUST_EPSILON};
use crate::types::{
    AccountSnapshot, AccountType, Asset, Balances, KycStatus, Notification, NotificationType,
    OrderPreview, OrderReceipt, OrderRequest, OrderSide, PortfolioSummary, StoreEvent, Trade,
    UserProfile, WriteBatch, WriteOp,
};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const AVATAR_URL: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=";

/// Ledger errors. Every precondition failure leaves state untouched.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Demo account has expired")]
    DemoExpired,

    #[error("Insufficient margin: need {required:.2}, have {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("Insufficient holdings of {symbol}: requested {requested}, held {held}")]
    InsufficientHoldings {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Leverage {requested} outside allowed range {min}..={max}")]
    LeverageOutOfRange { requested: f64, min: f64, max: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Verification status cannot move from {from} to {to}")]
    KycTransition { from: KycStatus, to: KycStatus },

    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Store read failed: {0}")]
    StoreReadFailed(String),
}

impl LedgerError {
    /// How far the order fell short, for declines that have a number.
    pub fn shortfall(&self) -> Option<f64> {
        match self {
            LedgerError::InsufficientMargin { required, available } => Some(required - available),
            LedgerError::InsufficientHoldings { requested, held, .. } => Some(requested - held),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::StoreReadFailed(e.to_string())
    }
}

/// Balance and position of one account after an order, before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub balance: f64,
    /// `None` when the position is fully closed.
    pub position: Option<Asset>,
    /// Margin debited (negative) or net proceeds credited.
    pub cash_delta: f64,
    /// Quantity actually traded.
    pub quantity: f64,
}

/// Open or add to a position. Only the margin is debited; the rest of the
/// notional is carried as borrowed.
pub fn fill_buy(
    balance: f64,
    position: Option<&Asset>,
    symbol: &str,
    quantity: f64,
    price: f64,
    leverage: f64,
) -> Result<OrderFill, LedgerError> {
    let notional = quantity * price;
    let required = margin::margin_required(notional, leverage);
    if required > balance {
        return Err(LedgerError::InsufficientMargin {
            required,
            available: balance,
        });
    }
    let borrowed_delta = margin::borrowed_amount(notional, leverage);

    let (old_quantity, old_avg, old_borrowed) = position
        .map(|p| (p.quantity, p.avg_price, p.borrowed))
        .unwrap_or((0.0, 0.0, 0.0));

    let asset = Asset {
        symbol: symbol.to_string(),
        quantity: old_quantity + quantity,
        avg_price: margin::weighted_average_price(old_quantity, old_avg, quantity, price),
        borrowed: old_borrowed + borrowed_delta,
    };

    Ok(OrderFill {
        balance: balance - required,
        position: Some(asset),
        cash_delta: -required,
        quantity,
    })
}

/// Reduce or close a position. Debt is repaid in proportion to the fraction
/// sold; a remainder under [`DUST_EPSILON`] closes the position.
pub fn fill_sell(
    balance: f64,
    position: Option<&Asset>,
    symbol: &str,
    quantity: f64,
    price: f64,
) -> Result<OrderFill, LedgerError> {
    let held = position.map(|p| p.quantity).unwrap_or(0.0);
    let Some(position) = position.filter(|_| held > 0.0 && quantity <= held + DUST_EPSILON) else {
        return Err(LedgerError::InsufficientHoldings {
            symbol: symbol.to_string(),
            requested: quantity,
            held,
        });
    };

    // Requests within dust of the full holding sell all of it
    let quantity = quantity.min(held);
    let repaid = margin::borrowed_repaid(position.borrowed, held, quantity);
    let proceeds = quantity * price - repaid;

    if balance + proceeds < 0.0 {
        return Err(LedgerError::InsufficientMargin {
            required: -proceeds,
            available: balance,
        });
    }

    let remaining = held - quantity;
    let position = if remaining < DUST_EPSILON {
        None
    } else {
        Some(Asset {
            symbol: symbol.to_string(),
            quantity: remaining,
            avg_price: position.avg_price,
            borrowed: (position.borrowed - repaid).max(0.0),
        })
    };

    Ok(OrderFill {
        balance: balance + proceeds,
        position,
        cash_delta: proceeds,
        quantity,
    })
}

/// The account ledger.
pub struct AccountLedger {
    store: Arc<dyn AccountStore>,
    config: LedgerConfig,
    /// Replayed view of recently touched users.
    users: DashMap<String, UserRecord>,
    /// Last read or write of each cached user.
    touched: DashMap<String, Instant>,
    /// Store events not yet replayed into `users`.
    events: Mutex<broadcast::Receiver<StoreEvent>>,
    account_locks: DashMap<(String, AccountType), Arc<Mutex<()>>>,
    profile_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountLedger {
    pub fn new(store: Arc<dyn AccountStore>, config: LedgerConfig) -> Self {
        let events = Mutex::new(store.subscribe());
        Self {
            store,
            config,
            users: DashMap::new(),
            touched: DashMap::new(),
            events,
            account_locks: DashMap::new(),
            profile_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Create a user's profile and seed the demo balance. Opening an
    /// existing account returns it unchanged.
    pub fn open_account(&self, uid: &str, name: &str, email: &str) -> Result<UserProfile, LedgerError> {
        if uid.trim().is_empty() {
            return Err(LedgerError::AccountNotFound(uid.to_string()));
        }

        let lock = self.profile_lock(uid);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(profile) = self.with_record(uid, |r| r.profile.clone())? {
            return Ok(profile);
        }

        let now = now_ms();
        let profile = UserProfile {
            uid: uid.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            trading_id: rand::thread_rng().gen_range(100_000..1_000_000).to_string(),
            avatar: format!("{}{}", AVATAR_URL, uid),
            kyc_status: KycStatus::None,
            created_at: now,
            demo_expires_at: Some(now.saturating_add(self.config.demo_trial_days.saturating_mul(DAY_MS))),
        };

        let mut batch = WriteBatch::new(uid);
        batch
            .push(WriteOp::SetProfile {
                profile: profile.clone(),
            })
            .push(WriteOp::SetBalance {
                account: AccountType::Demo,
                amount: self.config.demo_starting_balance,
            })
            .push(WriteOp::SetBalance {
                account: AccountType::Live,
                amount: 0.0,
            });
        self.commit(batch)?;

        info!("Opened account {} (trading id {})", uid, profile.trading_id);
        Ok(profile)
    }

    pub fn profile(&self, uid: &str) -> Result<UserProfile, LedgerError> {
        self.with_record(uid, |r| r.profile.clone())?
            .ok_or_else(|| LedgerError::AccountNotFound(uid.to_string()))
    }

    /// Request identity verification.
    pub fn submit_kyc(&self, uid: &str) -> Result<UserProfile, LedgerError> {
        self.set_kyc(uid, KycStatus::Pending)
    }

    /// Approve or reject a pending verification.
    pub fn review_kyc(&self, uid: &str, approved: bool) -> Result<UserProfile, LedgerError> {
        let to = if approved {
            KycStatus::Approved
        } else {
            KycStatus::Rejected
        };
        self.set_kyc(uid, to)
    }

    fn set_kyc(&self, uid: &str, to: KycStatus) -> Result<UserProfile, LedgerError> {
        let lock = self.profile_lock(uid);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut profile = self.profile(uid)?;
        let from = profile.kyc_status;
        let allowed = match to {
            KycStatus::Pending => matches!(from, KycStatus::None | KycStatus::Rejected),
            KycStatus::Approved | KycStatus::Rejected => from == KycStatus::Pending,
            KycStatus::None => false,
        };
        if !allowed {
            return Err(LedgerError::KycTransition { from, to });
        }
        profile.kyc_status = to;

        let mut batch = WriteBatch::new(uid);
        batch.push(WriteOp::SetProfile {
            profile: profile.clone(),
        });
        if matches!(to, KycStatus::Approved | KycStatus::Rejected) {
            let (title, message) = if to == KycStatus::Approved {
                ("Verification Approved", "Your identity has been verified.")
            } else {
                ("Verification Rejected", "Your identity verification was rejected.")
            };
            batch.push(WriteOp::AppendNotification {
                notification: Notification::new(
                    NotificationType::Kyc,
                    title,
                    message.to_string(),
                    now_ms(),
                ),
            });
        }
        self.commit(batch)?;

        info!("KYC for {}: {} -> {}", uid, from, to);
        Ok(profile)
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Execute a market order against one account.
    ///
    /// Balance, position, trade and notification are committed as one batch.
    pub fn execute_order(&self, request: &OrderRequest) -> Result<OrderReceipt, LedgerError> {
        self.validate(request)?;

        let lock = self.account_lock(&request.user_id, request.account);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let now = now_ms();
        let (balance, position, profile) = self.with_record(&request.user_id, |r| {
            (
                r.balances.get(request.account),
                r.positions(request.account).get(&request.symbol).cloned(),
                r.profile.clone(),
            )
        })?;
        let profile = profile.ok_or_else(|| LedgerError::AccountNotFound(request.user_id.clone()))?;
        if request.account == AccountType::Demo && profile.demo_expired(now) {
            warn!("Order declined for {}: demo account expired", request.user_id);
            return Err(LedgerError::DemoExpired);
        }

        let fill = match request.side {
            OrderSide::Buy => fill_buy(
                balance,
                position.as_ref(),
                &request.symbol,
                request.quantity,
                request.price,
                request.leverage,
            ),
            OrderSide::Sell => fill_sell(
                balance,
                position.as_ref(),
                &request.symbol,
                request.quantity,
                request.price,
            ),
        };
        let fill = match fill {
            Ok(fill) => fill,
            Err(e) => {
                warn!("Order declined for {}: {}", request.user_id, e);
                return Err(e);
            }
        };

        let (leverage, message) = match request.side {
            OrderSide::Buy => (
                request.leverage,
                format!(
                    "Bought {:.4} {} ({}x Lev)",
                    fill.quantity, request.symbol, request.leverage
                ),
            ),
            OrderSide::Sell => (1.0, format!("Sold {:.4} {}", fill.quantity, request.symbol)),
        };
        let trade = Trade::executed(
            request.side,
            &request.symbol,
            fill.quantity,
            request.price,
            request.account,
            leverage,
            now,
        );

        let mut batch = WriteBatch::new(&request.user_id);
        batch.push(WriteOp::SetBalance {
            account: request.account,
            amount: fill.balance,
        });
        match &fill.position {
            Some(asset) => batch.push(WriteOp::SetPosition {
                account: request.account,
                asset: asset.clone(),
            }),
            None => batch.push(WriteOp::DeletePosition {
                account: request.account,
                symbol: request.symbol.clone(),
            }),
        };
        batch
            .push(WriteOp::AppendTrade {
                trade: trade.clone(),
            })
            .push(WriteOp::AppendNotification {
                notification: Notification::new(
                    NotificationType::Order,
                    "Order Executed",
                    message.clone(),
                    now,
                ),
            });
        self.commit(batch)?;

        info!("{} [{}]: {}", request.user_id, request.account, message);
        Ok(OrderReceipt {
            trade,
            balance: fill.balance,
            position: fill.position,
            cash_delta: fill.cash_delta,
        })
    }

    /// What an order would cost right now. Mutates nothing.
    pub fn preview_order(&self, request: &OrderRequest) -> Result<OrderPreview, LedgerError> {
        self.validate(request)?;

        let (balance, position, profile) = self.with_record(&request.user_id, |r| {
            (
                r.balances.get(request.account),
                r.positions(request.account).get(&request.symbol).cloned(),
                r.profile.clone(),
            )
        })?;
        let profile = profile.ok_or_else(|| LedgerError::AccountNotFound(request.user_id.clone()))?;
        let expired = request.account == AccountType::Demo && profile.demo_expired(now_ms());

        let notional = request.quantity * request.price;
        let (margin_required, borrowed_delta, fill) = match request.side {
            OrderSide::Buy => (
                margin::margin_required(notional, request.leverage),
                margin::borrowed_amount(notional, request.leverage),
                fill_buy(
                    balance,
                    position.as_ref(),
                    &request.symbol,
                    request.quantity,
                    request.price,
                    request.leverage,
                ),
            ),
            OrderSide::Sell => {
                let repaid = position
                    .as_ref()
                    .map(|p| margin::borrowed_repaid(p.borrowed, p.quantity, request.quantity.min(p.quantity)))
                    .unwrap_or(0.0);
                (
                    0.0,
                    -repaid,
                    fill_sell(
                        balance,
                        position.as_ref(),
                        &request.symbol,
                        request.quantity,
                        request.price,
                    ),
                )
            }
        };

        Ok(OrderPreview {
            notional,
            margin_required,
            borrowed_delta,
            available_balance: balance,
            buying_power: margin::buying_power(balance, request.leverage),
            accepted: !expired && fill.is_ok(),
        })
    }

    fn validate(&self, request: &OrderRequest) -> Result<(), LedgerError> {
        if !request.quantity.is_finite() || request.quantity <= 0.0 {
            return Err(LedgerError::InvalidOrder(
                "Quantity must be positive".to_string(),
            ));
        }
        if !request.price.is_finite() || request.price <= 0.0 {
            return Err(LedgerError::InvalidOrder("Price must be positive".to_string()));
        }
        let (min, max) = (self.config.min_leverage, self.config.max_leverage);
        if request.side == OrderSide::Buy
            && (!request.leverage.is_finite() || request.leverage < min || request.leverage > max)
        {
            return Err(LedgerError::LeverageOutOfRange {
                requested: request.leverage,
                min,
                max,
            });
        }
        if !self.config.instruments.is_empty()
            && !self.config.instruments.iter().any(|s| *s == request.symbol)
        {
            return Err(LedgerError::UnknownInstrument(request.symbol.clone()));
        }
        Ok(())
    }

    // ========================================================================
    // Funds
    // ========================================================================

    /// Credit the live balance. No payment is processed.
    pub fn deposit(&self, uid: &str, amount: f64) -> Result<Balances, LedgerError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let lock = self.account_lock(uid, AccountType::Live);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut balances, profile) = self.with_record(uid, |r| (r.balances, r.profile.is_some()))?;
        if !profile {
            return Err(LedgerError::AccountNotFound(uid.to_string()));
        }
        balances.live += amount;

        let mut batch = WriteBatch::new(uid);
        batch
            .push(WriteOp::SetBalance {
                account: AccountType::Live,
                amount: balances.live,
            })
            .push(WriteOp::AppendNotification {
                notification: Notification::new(
                    NotificationType::System,
                    "Deposit Successful",
                    format!("Added ${:.2} to Live Account", amount),
                    now_ms(),
                ),
            });
        self.commit(batch)?;

        info!("Deposited {:.2} to live account of {}", amount, uid);
        Ok(balances)
    }

    // ========================================================================
    // Read views
    // ========================================================================

    pub fn balances(&self, uid: &str) -> Result<Balances, LedgerError> {
        self.with_record(uid, |r| r.balances)
    }

    pub fn positions(&self, uid: &str, account: AccountType) -> Result<Vec<Asset>, LedgerError> {
        self.with_record(uid, |r| r.positions(account).values().cloned().collect())
    }

    pub fn position(&self, uid: &str, account: AccountType, symbol: &str) -> Result<Option<Asset>, LedgerError> {
        self.with_record(uid, |r| r.positions(account).get(symbol).cloned())
    }

    /// Trades in execution order.
    pub fn trades(&self, uid: &str) -> Result<Vec<Trade>, LedgerError> {
        self.with_record(uid, |r| r.trades.clone())
    }

    pub fn notifications(&self, uid: &str) -> Result<Vec<Notification>, LedgerError> {
        self.with_record(uid, |r| r.notifications.clone())
    }

    pub fn snapshot(&self, uid: &str) -> Result<AccountSnapshot, LedgerError> {
        self.with_record(uid, |r| AccountSnapshot {
            balances: r.balances,
            demo_positions: r.demo_positions.values().cloned().collect(),
            live_positions: r.live_positions.values().cloned().collect(),
            trades: r.trades.clone(),
            notifications: r.notifications.clone(),
        })
    }

    /// Value an account at `prices`.
    pub fn summary(
        &self,
        uid: &str,
        account: AccountType,
        prices: &HashMap<String, f64>,
        leverage: f64,
    ) -> Result<PortfolioSummary, LedgerError> {
        let (balance, positions) = self.with_record(uid, |r| {
            (
                r.balances.get(account),
                r.positions(account).values().cloned().collect::<Vec<_>>(),
            )
        })?;
        Ok(margin::summarize(account, balance, &positions, prices, leverage))
    }

    /// Mark notifications read, all of them when `ids` is `None`.
    pub fn mark_notifications_read(&self, uid: &str, ids: Option<Vec<String>>) -> Result<(), LedgerError> {
        let lock = self.profile_lock(uid);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut batch = WriteBatch::new(uid);
        batch.push(WriteOp::MarkNotificationsRead { ids });
        self.commit(batch)
    }

    // ========================================================================
    // Store events
    // ========================================================================

    /// Receive every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Replay store events not yet applied to the view.
    pub fn sync(&self) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        self.replay(&mut events);
    }

    /// Keep the view current in the background as the store pushes changes.
    pub fn spawn_store_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        let mut wake = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                match wake.recv().await {
                    Ok(event) => {
                        debug!("Store event for {} ({} ops)", event.user_id, event.ops.len());
                        ledger.sync();
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!("Store listener skipped {} wakeups", n);
                        ledger.sync();
                    }
                    Err(RecvError::Closed) => {
                        info!("Account store closed, stopping listener");
                        break;
                    }
                }
            }
        })
    }

    fn replay(&self, events: &mut broadcast::Receiver<StoreEvent>) {
        let mut by_user: HashMap<String, Vec<WriteOp>> = HashMap::new();
        loop {
            match events.try_recv() {
                Ok(event) => by_user.entry(event.user_id).or_default().extend(event.ops),
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Ledger view missed {} store events, reloading", n);
                    by_user.clear();
                    self.users.clear();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        // One guard per user so readers see all of a drain or none of it
        for (uid, ops) in by_user {
            if let Some(mut record) = self.users.get_mut(&uid) {
                record.apply_all(&ops);
            }
        }
    }

    /// Read the view for `uid`, loading it from the store on first touch.
    ///
    /// The load runs without the event lock so first touches of different
    /// users do not queue behind each other. Commits landing during the load
    /// are caught up from a receiver subscribed before it.
    fn with_record<T>(&self, uid: &str, f: impl FnOnce(&UserRecord) -> T) -> Result<T, LedgerError> {
        self.touched.insert(uid.to_string(), Instant::now());
        {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            self.replay(&mut events);
            if let Some(record) = self.users.get(uid) {
                return Ok(f(&record));
            }
        }

        loop {
            let mut catchup = self.store.subscribe();
            let mut record = self.load(uid)?;

            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            self.replay(&mut events);
            if let Some(cached) = self.users.get(uid) {
                return Ok(f(&cached));
            }
            if !catch_up(uid, &mut record, &mut catchup) {
                warn!("Store moved on while loading {}, reloading", uid);
                continue;
            }

            let value = f(&record);
            self.users.insert(uid.to_string(), record);
            return Ok(value);
        }
    }

    fn load(&self, uid: &str) -> Result<UserRecord, StoreError> {
        debug!("Loading account records for {}", uid);
        Ok(UserRecord {
            balances: self.store.balances(uid)?,
            demo_positions: self
                .store
                .positions(uid, AccountType::Demo)?
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
            live_positions: self
                .store
                .positions(uid, AccountType::Live)?
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
            trades: self.store.trades(uid)?,
            notifications: self.store.notifications(uid)?,
            watchlist: self.store.watchlist(uid)?,
            profile: self.store.profile(uid)?,
        })
    }

    /// Commit and replay. The view only changes once the store accepted the
    /// batch.
    fn commit(&self, batch: WriteBatch) -> Result<(), LedgerError> {
        let uid = batch.user_id.clone();
        self.store.commit(batch).map_err(|e| {
            error!("Store write failed for {}: {}", uid, e);
            LedgerError::StoreWriteFailed(e.to_string())
        })?;
        self.sync();
        Ok(())
    }

    fn account_lock(&self, uid: &str, account: AccountType) -> Arc<Mutex<()>> {
        self.account_locks
            .entry((uid.to_string(), account))
            .or_default()
            .clone()
    }

    fn profile_lock(&self, uid: &str) -> Arc<Mutex<()>> {
        self.profile_locks.entry(uid.to_string()).or_default().clone()
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Number of users with a cached view.
    pub fn cached_users(&self) -> usize {
        self.users.len()
    }

    /// Drop the cached view and unused locks of users not touched within
    /// `max_idle`. Returns how many users were released.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<String> = self
            .touched
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        for uid in &idle {
            self.release(uid);
        }
        if !idle.is_empty() {
            debug!("Released {} idle accounts", idle.len());
        }
        idle.len()
    }

    /// Forget everything cached for `uid`. The next read reloads it from the
    /// store. Locks still held by an operation are kept.
    pub fn release(&self, uid: &str) {
        self.touched.remove(uid);
        self.users.remove(uid);
        self.account_locks
            .retain(|(user, _), lock| user != uid || Arc::strong_count(lock) > 1);
        self.profile_locks
            .remove_if(uid, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Release idle accounts every `max_idle`.
    pub fn spawn_idle_eviction(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_idle);
            loop {
                ticker.tick().await;
                ledger.evict_idle(max_idle);
            }
        })
    }
}

/// Apply to `record` the events `catchup` saw for `uid`. False when the
/// receiver lagged and the record may be missing writes.
fn catch_up(uid: &str, record: &mut UserRecord, catchup: &mut broadcast::Receiver<StoreEvent>) -> bool {
    loop {
        match catchup.try_recv() {
            Ok(event) => {
                if event.user_id == uid {
                    record.apply_all(&event.ops);
                }
            }
            Err(TryRecvError::Lagged(_)) => return false,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return true,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::account_store::MemoryStore;
    use proptest::prelude::*;

    fn ledger() -> AccountLedger {
        AccountLedger::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    // ========================================================================
    // Accounts and eviction
    // ========================================================================

    #[test]
    fn test_trial_length_saturates() {
        let config = LedgerConfig {
            demo_trial_days: i64::MAX,
            ..LedgerConfig::default()
        };
        let ledger = AccountLedger::new(Arc::new(MemoryStore::new()), config);

        let profile = ledger.open_account("u1", "Trader", "").unwrap();
        assert_eq!(profile.demo_expires_at, Some(i64::MAX));
        assert!(!profile.demo_expired(now_ms()));
    }

    #[test]
    fn test_release_keeps_locks_in_use() {
        let ledger = ledger();
        ledger.open_account("u1", "Trader", "").unwrap();
        let held = ledger.account_lock("u1", AccountType::Demo);
        ledger.account_lock("u1", AccountType::Live);

        ledger.release("u1");

        assert_eq!(ledger.cached_users(), 0);
        assert!(ledger.account_locks.contains_key(&("u1".to_string(), AccountType::Demo)));
        assert!(!ledger.account_locks.contains_key(&("u1".to_string(), AccountType::Live)));
        assert!(Arc::ptr_eq(&held, &ledger.account_lock("u1", AccountType::Demo)));
        assert_eq!(ledger.balances("u1").unwrap().demo, 10_000.0);
    }

    #[test]
    fn test_evict_idle_spares_recent_users() {
        let ledger = ledger();
        ledger.open_account("u1", "Trader", "").unwrap();
        ledger.open_account("u2", "Trader", "").unwrap();

        assert_eq!(ledger.evict_idle(Duration::from_secs(3_600)), 0);
        assert_eq!(ledger.cached_users(), 2);
        assert_eq!(ledger.evict_idle(Duration::ZERO), 2);
        assert_eq!(ledger.cached_users(), 0);
        assert!(ledger.profile_locks.is_empty());
    }

    // ========================================================================
    // Fill math
    // ========================================================================

    #[test]
    fn test_fill_buy_leveraged() {
        let fill = fill_buy(10_000.0, None, "BTC", 0.1, 50_000.0, 2.0).unwrap();
        assert_eq!(fill.balance, 7_500.0);
        assert_eq!(fill.cash_delta, -2_500.0);
        let asset = fill.position.unwrap();
        assert_eq!(asset.quantity, 0.1);
        assert_eq!(asset.avg_price, 50_000.0);
        assert_eq!(asset.borrowed, 2_500.0);
    }

    #[test]
    fn test_fill_buy_insufficient_margin_reports_shortfall() {
        let err = fill_buy(1_000.0, None, "BTC", 1.0, 50_000.0, 10.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientMargin { .. }));
        assert_eq!(err.shortfall(), Some(4_000.0));
    }

    #[test]
    fn test_fill_sell_requires_holding() {
        let err = fill_sell(0.0, None, "ETH", 1.0, 10.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientHoldings { held, .. } if held == 0.0));
        assert_eq!(err.shortfall(), Some(1.0));
    }

    #[test]
    fn test_fill_sell_partial_keeps_avg_price() {
        let asset = Asset {
            symbol: "BTC".to_string(),
            quantity: 4.0,
            avg_price: 100.0,
            borrowed: 200.0,
        };
        let fill = fill_sell(0.0, Some(&asset), "BTC", 1.0, 120.0).unwrap();
        assert_eq!(fill.cash_delta, 120.0 - 50.0);
        let remaining = fill.position.unwrap();
        assert_eq!(remaining.quantity, 3.0);
        assert_eq!(remaining.avg_price, 100.0);
        assert_eq!(remaining.borrowed, 150.0);
    }

    #[test]
    fn test_fill_sell_dust_closes_position() {
        let asset = Asset {
            symbol: "SOL".to_string(),
            quantity: 1.0,
            avg_price: 10.0,
            borrowed: 0.0,
        };
        let below = fill_sell(0.0, Some(&asset), "SOL", 1.0 - 5e-7, 10.0).unwrap();
        assert!(below.position.is_none());

        let above = fill_sell(0.0, Some(&asset), "SOL", 1.0 + 5e-7, 10.0).unwrap();
        assert!(above.position.is_none());
        assert_eq!(above.quantity, 1.0);
    }

    #[test]
    fn test_fill_sell_cannot_drive_balance_negative() {
        let asset = Asset {
            symbol: "BTC".to_string(),
            quantity: 1.0,
            avg_price: 100.0,
            borrowed: 90.0,
        };
        let err = fill_sell(0.0, Some(&asset), "BTC", 1.0, 50.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientMargin { .. }));
    }

    // ========================================================================
    // Ledger
    // ========================================================================

    #[test]
    fn test_open_account_is_idempotent() {
        let ledger = ledger();
        let first = ledger.open_account("u1", "Ada", "ada@example.com").unwrap();
        let second = ledger.open_account("u1", "Other", "other@example.com").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.trading_id.len(), 6);
        assert_eq!(ledger.balances("u1").unwrap().demo, 10_000.0);
    }

    #[test]
    fn test_order_on_unknown_account() {
        let ledger = ledger();
        let request = OrderRequest::buy("ghost", AccountType::Live, "BTC", 1.0, 1.0);
        assert!(matches!(
            ledger.execute_order(&request),
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_validation() {
        let ledger = ledger();
        ledger.open_account("u1", "Ada", "").unwrap();

        let zero = OrderRequest::buy("u1", AccountType::Demo, "BTC", 0.0, 1.0);
        assert!(matches!(ledger.execute_order(&zero), Err(LedgerError::InvalidOrder(_))));

        let lev = OrderRequest::buy("u1", AccountType::Demo, "BTC", 1.0, 1.0).with_leverage(500.0);
        assert!(matches!(
            ledger.execute_order(&lev),
            Err(LedgerError::LeverageOutOfRange { .. })
        ));

        let unknown = OrderRequest::buy("u1", AccountType::Demo, "NOPE", 1.0, 1.0);
        assert!(matches!(
            ledger.execute_order(&unknown),
            Err(LedgerError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_kyc_transitions() {
        let ledger = ledger();
        ledger.open_account("u1", "Ada", "").unwrap();

        assert!(matches!(
            ledger.review_kyc("u1", true),
            Err(LedgerError::KycTransition { .. })
        ));
        assert_eq!(ledger.submit_kyc("u1").unwrap().kyc_status, KycStatus::Pending);
        assert_eq!(ledger.review_kyc("u1", false).unwrap().kyc_status, KycStatus::Rejected);
        assert_eq!(ledger.submit_kyc("u1").unwrap().kyc_status, KycStatus::Pending);
        assert_eq!(ledger.review_kyc("u1", true).unwrap().kyc_status, KycStatus::Approved);

        let kyc_notes = ledger
            .notifications("u1")
            .unwrap()
            .into_iter()
            .filter(|n| n.notification_type == NotificationType::Kyc)
            .count();
        assert_eq!(kyc_notes, 2);
    }

    #[test]
    fn test_mark_notifications_read() {
        let ledger = ledger();
        ledger.open_account("u1", "Ada", "").unwrap();
        ledger.deposit("u1", 10.0).unwrap();
        ledger.deposit("u1", 20.0).unwrap();

        ledger.mark_notifications_read("u1", None).unwrap();
        assert!(ledger.notifications("u1").unwrap().iter().all(|n| n.read));
    }

    proptest! {
        #[test]
        fn prop_weighted_average_independent_of_split(
            buys in prop::collection::vec((0.001f64..10.0, 1.0f64..1_000.0), 1..8),
        ) {
            let mut balance = 1e12;
            let mut position: Option<Asset> = None;
            for (quantity, price) in &buys {
                let fill = fill_buy(balance, position.as_ref(), "BTC", *quantity, *price, 1.0).unwrap();
                balance = fill.balance;
                position = fill.position;
            }
            let total_cost: f64 = buys.iter().map(|(q, p)| q * p).sum();
            let total_quantity: f64 = buys.iter().map(|(q, _)| q).sum();
            let position = position.unwrap();
            let expected = total_cost / total_quantity;
            prop_assert!((position.avg_price - expected).abs() <= expected * 1e-9);
            prop_assert!((position.quantity - total_quantity).abs() <= total_quantity * 1e-12);
        }

        #[test]
        fn prop_round_trip_restores_balance(
            quantity in 0.001f64..10.0,
            price in 1.0f64..100_000.0,
            leverage in 1.0f64..200.0,
        ) {
            let start = quantity * price;
            let bought = fill_buy(start, None, "ETH", quantity, price, leverage).unwrap();
            prop_assert!(bought.balance >= 0.0);
            let sold = fill_sell(bought.balance, bought.position.as_ref(), "ETH", quantity, price).unwrap();
            prop_assert!(sold.position.is_none());
            prop_assert!((sold.balance - start).abs() <= start * 1e-9);
        }

        #[test]
        fn prop_balance_never_negative(
            orders in prop::collection::vec((any::<bool>(), 0.01f64..5.0, 10.0f64..200.0, 1.0f64..20.0), 1..20),
        ) {
            let mut balance = 1_000.0;
            let mut position: Option<Asset> = None;
            for (buy, quantity, price, leverage) in orders {
                let fill = if buy {
                    fill_buy(balance, position.as_ref(), "SOL", quantity, price, leverage)
                } else {
                    fill_sell(balance, position.as_ref(), "SOL", quantity, price)
                };
                if let Ok(fill) = fill {
                    balance = fill.balance;
                    position = fill.position;
                }
                prop_assert!(balance >= 0.0);
                if let Some(p) = &position {
                    prop_assert!(p.quantity > 0.0);
                }
            }
        }
    }
}

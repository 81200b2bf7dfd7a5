pub mod account_store;
pub mod ledger;
pub mod margin;
pub mod market_feed;
pub mod order_book;
pub mod price_history;
pub mod sqlite_store;
pub mod watchlist;

pub use account_store::{AccountStore, MemoryStore, StoreError, UserRecord};
pub use ledger::{fill_buy, fill_sell, AccountLedger, LedgerError, OrderFill};
pub use market_feed::{FeedError, MarketFeed, QuoteSource};
pub use price_history::PriceHistoryBuffer;
pub use sqlite_store::SqliteAccountStore;
pub use watchlist::{WatchlistError, WatchlistStore, DEFAULT_WATCHLIST};

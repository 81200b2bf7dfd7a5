pub mod finnhub;
pub mod finnhub_ws;

pub use finnhub::FinnhubClient;
pub use finnhub_ws::{parse_trade_message, FinnhubStream};

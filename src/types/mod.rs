pub mod account;
pub mod market;
pub mod notification;
pub mod store;
pub mod trading;
pub mod ws;

pub use account::*;
pub use market::*;
pub use notification::*;
pub use store::*;
pub use trading::*;
pub use ws::*;

pub mod handler;
pub mod room_manager;

pub use handler::{spawn_broadcasters, ws_handler};
pub use room_manager::{account_room, RoomManager};

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Room name for account events of `user_id`.
pub fn account_room(user_id: &str) -> String {
    format!("account:{}", user_id)
}

/// A client's subscription information.
pub struct ClientSubscription {
    /// Joined rooms: instrument symbols and account rooms.
    pub rooms: HashSet<String>,
    /// Channel to send messages to the client.
    pub tx: mpsc::UnboundedSender<String>,
}

/// Manages WebSocket client subscriptions.
pub struct RoomManager {
    /// Client subscriptions keyed by client ID.
    pub clients: DashMap<Uuid, ClientSubscription>,
    /// Room name -> set of client IDs.
    rooms: DashMap<String, HashSet<Uuid>>,
}

impl RoomManager {
    /// Create a new room manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new client.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let client_id = Uuid::new_v4();
        self.clients.insert(
            client_id,
            ClientSubscription {
                rooms: HashSet::new(),
                tx,
            },
        );
        client_id
    }

    /// Unregister a client and remove from all rooms.
    pub fn unregister(&self, client_id: Uuid) {
        if let Some((_, subscription)) = self.clients.remove(&client_id) {
            for room in subscription.rooms {
                self.leave_room(&room, client_id);
            }
        }
    }

    /// Subscribe a client to instrument symbols. Returns the newly joined
    /// symbols.
    pub fn subscribe(&self, client_id: Uuid, symbols: &[String]) -> Vec<String> {
        let rooms: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();
        self.join(client_id, &rooms)
    }

    /// Unsubscribe a client from instrument symbols.
    pub fn unsubscribe(&self, client_id: Uuid, symbols: &[String]) -> Vec<String> {
        let rooms: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();
        self.leave(client_id, &rooms)
    }

    /// Receive account events of `user_id`.
    pub fn watch_account(&self, client_id: Uuid, user_id: &str) -> bool {
        !self.join(client_id, &[account_room(user_id)]).is_empty()
    }

    pub fn unwatch_account(&self, client_id: Uuid, user_id: &str) -> bool {
        !self.leave(client_id, &[account_room(user_id)]).is_empty()
    }

    fn join(&self, client_id: Uuid, rooms: &[String]) -> Vec<String> {
        let mut joined = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for room in rooms {
                if !room.is_empty() && client.rooms.insert(room.clone()) {
                    joined.push(room.clone());
                    self.rooms.entry(room.clone()).or_default().insert(client_id);
                }
            }
        }

        joined
    }

    fn leave(&self, client_id: Uuid, rooms: &[String]) -> Vec<String> {
        let mut left = Vec::new();

        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for room in rooms {
                if client.rooms.remove(room) {
                    left.push(room.clone());
                    self.leave_room(room, client_id);
                }
            }
        }

        left
    }

    fn leave_room(&self, room: &str, client_id: Uuid) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&client_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Get all clients in a room.
    pub fn get_subscribers(&self, room: &str) -> Vec<mpsc::UnboundedSender<String>> {
        let client_ids: Vec<Uuid> = self
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();

        client_ids
            .iter()
            .filter_map(|id| self.clients.get(id).map(|c| c.tx.clone()))
            .collect()
    }

    /// Broadcast a message to every client in a room.
    pub fn broadcast(&self, room: &str, message: &str) {
        for tx in self.get_subscribers(room) {
            let _ = tx.send(message.to_string());
        }
    }

    /// Broadcast a message to all connected clients.
    pub fn broadcast_all(&self, message: &str) {
        for client in self.clients.iter() {
            let _ = client.tx.send(message.to_string());
        }
    }

    /// Send a message to one client.
    pub fn send(&self, client_id: Uuid, message: String) {
        if let Some(client) = self.clients.get(&client_id) {
            let _ = client.tx.send(message);
        }
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Get the number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_normalizes_and_dedupes() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.register(tx);

        let joined = manager.subscribe(id, &["btc".to_string(), "BTC".to_string(), "eth".to_string()]);
        assert_eq!(joined, vec!["BTC", "ETH"]);
        assert_eq!(manager.room_count(), 2);
    }

    #[test]
    fn test_broadcast_reaches_room_members_only() {
        let manager = RoomManager::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = manager.register(tx_a);
        let _b = manager.register(tx_b);

        manager.subscribe(a, &["SOL".to_string()]);
        manager.broadcast("SOL", "tick");

        assert_eq!(rx_a.try_recv().unwrap(), "tick");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_account_rooms() {
        let manager = RoomManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = manager.register(tx);

        assert!(manager.watch_account(id, "u1"));
        assert!(!manager.watch_account(id, "u1"));
        manager.broadcast(&account_room("u1"), "changed");
        assert_eq!(rx.try_recv().unwrap(), "changed");

        assert!(manager.unwatch_account(id, "u1"));
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_unregister_cleans_rooms() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.register(tx);
        manager.subscribe(id, &["BTC".to_string()]);
        manager.watch_account(id, "u1");

        manager.unregister(id);
        assert_eq!(manager.client_count(), 0);
        assert_eq!(manager.room_count(), 0);
    }
}

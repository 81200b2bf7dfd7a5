//! Notification types appended by the ledger.

use serde::{Deserialize, Serialize};

/// Notification type categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Order,
    Alert,
    Kyc,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::Order => "order",
            NotificationType::Alert => "alert",
            NotificationType::Kyc => "kyc",
            NotificationType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "order" => NotificationType::Order,
            "alert" => NotificationType::Alert,
            "kyc" => NotificationType::Kyc,
            _ => NotificationType::System,
        }
    }
}

/// A notification record. Only `read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique notification ID
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Short title
    pub title: String,
    pub message: String,
    /// Whether the notification has been read
    pub read: bool,
    /// Timestamp in milliseconds
    pub timestamp: i64,
}

impl Notification {
    /// Create an unread notification.
    pub fn new(notification_type: NotificationType, title: &str, message: String, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type,
            title: title.to_string(),
            message,
            read: false,
            timestamp,
        }
    }
}

/// Request to mark notifications as read.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Notification IDs to mark as read. If absent, marks all as read.
    pub ids: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_round_names() {
        assert_eq!(NotificationType::parse("kyc"), NotificationType::Kyc);
        assert_eq!(NotificationType::parse("anything"), NotificationType::System);
        assert_eq!(NotificationType::Order.as_str(), "order");
    }

    #[test]
    fn test_new_notification_is_unread() {
        let n = Notification::new(NotificationType::Order, "Order Executed", "Bought".to_string(), 5);
        assert!(!n.read);
        assert_eq!(n.timestamp, 5);
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"order\""));
    }
}

//! Write operations and change events exchanged with the account store.

use super::{AccountType, Asset, Notification, Trade, UserProfile};
use serde::{Deserialize, Serialize};

/// A single keyed write. Every op is idempotent so re-applying an echoed
/// change leaves state unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    SetBalance {
        account: AccountType,
        amount: f64,
    },
    SetPosition {
        account: AccountType,
        asset: Asset,
    },
    DeletePosition {
        account: AccountType,
        symbol: String,
    },
    AppendTrade {
        trade: Trade,
    },
    AppendNotification {
        notification: Notification,
    },
    /// Marks the listed notifications read, or all when `ids` is `None`.
    MarkNotificationsRead {
        ids: Option<Vec<String>>,
    },
    SetWatchlist {
        symbols: Vec<String>,
    },
    SetProfile {
        profile: UserProfile,
    },
}

/// A multi-key write for one user, applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBatch {
    pub user_id: String,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Change pushed by the store after a batch is committed, whichever session
/// wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEvent {
    pub user_id: String,
    pub ops: Vec<WriteOp>,
    /// Commit time in milliseconds.
    pub committed_at: i64,
}

impl From<WriteBatch> for StoreEvent {
    fn from(batch: WriteBatch) -> Self {
        Self {
            user_id: batch.user_id,
            ops: batch.ops,
            committed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

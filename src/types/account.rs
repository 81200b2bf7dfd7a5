//! Account, balance and position types.

use serde::{Deserialize, Serialize};
use std::fmt;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Which of the two segregated sub-accounts an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Time-limited simulated funds.
    Demo,
    /// Real funds.
    Live,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Demo => "demo",
            AccountType::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "demo" => Some(AccountType::Demo),
            "live" => Some(AccountType::Live),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two cash balances of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub demo: f64,
    pub live: f64,
}

impl Balances {
    pub fn get(&self, account: AccountType) -> f64 {
        match account {
            AccountType::Demo => self.demo,
            AccountType::Live => self.live,
        }
    }

    pub fn set(&mut self, account: AccountType, amount: f64) {
        match account {
            AccountType::Demo => self.demo = amount,
            AccountType::Live => self.live = amount,
        }
    }
}

/// A held position. Absence of the record means no holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub symbol: String,
    #[serde(rename = "qty")]
    pub quantity: f64,
    /// Weighted-average entry price.
    pub avg_price: f64,
    /// Synthetic leverage debt in quote currency.
    #[serde(default)]
    pub borrowed: f64,
}

impl Asset {
    /// Quantity times average entry price.
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_price
    }
}

/// Identity-verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    #[default]
    None,
    Pending,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::None => "none",
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User profile record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub name: String,
    pub email: String,
    /// Six-digit public trading id.
    pub trading_id: String,
    pub avatar: String,
    pub kyc_status: KycStatus,
    /// Creation time in milliseconds.
    pub created_at: i64,
    /// Set once at creation, never extended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_expires_at: Option<i64>,
}

impl UserProfile {
    /// Whether the demo account is inert at `now` (ms).
    pub fn demo_expired(&self, now: i64) -> bool {
        matches!(self.demo_expires_at, Some(expires_at) if now > expires_at)
    }

    /// Milliseconds of demo trial left, clamped at zero.
    pub fn demo_time_left(&self, now: i64) -> i64 {
        self.demo_expires_at
            .map(|expires_at| (expires_at - now).max(0))
            .unwrap_or(0)
    }

    /// Whole days left on the demo trial, rounded up.
    pub fn demo_days_left(&self, now: i64) -> i64 {
        let left = self.demo_time_left(now);
        left / DAY_MS + i64::from(left % DAY_MS != 0)
    }
}

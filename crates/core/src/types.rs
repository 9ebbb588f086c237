use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;
pub type RecipientId = i64;
pub type MessageId = i64;
pub type SendRecordId = i64;

/// A sender identity with its own minimum-interval throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Human-readable identity used in logs, typically the phone number.
    pub label: String,
    /// Provider-specific credential blob; opaque to the scheduler.
    pub credentials: serde_json::Value,
    /// Minimum gap in seconds between two successful sends from this account.
    pub delay_secs: u32,
    /// Last confirmed successful send, in the textual form the store
    /// persists. Consumers parse it; a malformed value reads as no history.
    pub last_sent: Option<String>,
}

/// Insert payload for a new account; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub label: String,
    pub credentials: serde_json::Value,
    /// Falls back to the store's configured default when absent.
    pub delay_secs: Option<u32>,
}

/// A message destination, addressed by handle or phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub identifier: String,
}

/// An immutable message body; one message may fan out into many send records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Pending,
    Sent,
    Failed,
}

/// Outcome of one (account, recipient) send attempt. Append-only: a retry
/// writes its own record, never an update of a prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: SendRecordId,
    pub account_id: AccountId,
    pub recipient_id: RecipientId,
    pub message_id: MessageId,
    pub status: SendStatus,
    pub sent_at: DateTime<Utc>,
}

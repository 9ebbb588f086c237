//! Persistence collaborator for the scheduler: a durable store of accounts,
//! contacts, messages, and send records keyed by integer ids.
//!
//! The dispatch engine stays agnostic to the concrete backend; every
//! operation is atomic at the single-record level and no multi-record
//! transactions are assumed.

pub mod memory;

use chrono::{DateTime, Utc};
use waveline_core::error::StoreError;
use waveline_core::types::{
    Account, AccountId, Message, MessageId, NewAccount, Recipient, RecipientId, SendRecord,
    SendRecordId, SendStatus,
};

pub use memory::MemoryStore;

/// Durable storage behind the scheduler.
pub trait Store: Send + Sync {
    /// Create an account, assigning its id. Rejects a zero delay.
    fn create_account(&self, new: NewAccount) -> Result<Account, StoreError>;

    /// Fetch one account; `Ok(None)` when the id is unknown.
    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// All accounts, ordered by id.
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Change an account's minimum send interval. Rejects a zero delay.
    fn update_account_delay(&self, id: AccountId, delay_secs: u32) -> Result<(), StoreError>;

    /// Record the time of the account's last confirmed successful send.
    fn update_account_last_sent(&self, id: AccountId, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Remove an account record; `true` when something was deleted. Send
    /// records referencing the account are kept as history.
    fn delete_account(&self, id: AccountId) -> Result<bool, StoreError>;

    /// Create a contact, assigning its id.
    fn create_contact(&self, identifier: &str) -> Result<Recipient, StoreError>;

    /// All contacts, ordered by id.
    fn contacts(&self) -> Result<Vec<Recipient>, StoreError>;

    /// Persist a message body, assigning its id and creation time.
    fn create_message(&self, text: &str) -> Result<Message, StoreError>;

    /// Append one send-attempt outcome. Records are never updated afterwards.
    fn create_send_record(
        &self,
        account_id: AccountId,
        recipient_id: RecipientId,
        message_id: MessageId,
        status: SendStatus,
    ) -> Result<SendRecordId, StoreError>;

    /// Send history, newest first.
    fn send_history(&self) -> Result<Vec<SendRecord>, StoreError>;

    /// Purge the send history, returning the number of removed records.
    fn clear_send_history(&self) -> Result<u64, StoreError>;
}

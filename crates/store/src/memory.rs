//! In-memory reference implementation of [`Store`], used by the demo driver
//! and tests.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use waveline_core::config::StoreConfig;
use waveline_core::error::StoreError;
use waveline_core::types::{
    Account, AccountId, Message, MessageId, NewAccount, Recipient, RecipientId, SendRecord,
    SendRecordId, SendStatus,
};

use crate::Store;

/// DashMap-backed store with monotonically increasing ids per table.
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    contacts: DashMap<RecipientId, Recipient>,
    messages: DashMap<MessageId, Message>,
    records: DashMap<SendRecordId, SendRecord>,
    next_account_id: AtomicI64,
    next_contact_id: AtomicI64,
    next_message_id: AtomicI64,
    next_record_id: AtomicI64,
    default_delay_secs: u32,
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            contacts: DashMap::new(),
            messages: DashMap::new(),
            records: DashMap::new(),
            next_account_id: AtomicI64::new(1),
            next_contact_id: AtomicI64::new(1),
            next_message_id: AtomicI64::new(1),
            next_record_id: AtomicI64::new(1),
            default_delay_secs: config.default_account_delay_secs,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl Store for MemoryStore {
    fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let delay_secs = new.delay_secs.unwrap_or(self.default_delay_secs);
        if delay_secs == 0 {
            return Err(StoreError::InvalidDelay);
        }
        let id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        let account = Account {
            id,
            label: new.label,
            credentials: new.credentials,
            delay_secs,
            last_sent: None,
        };
        self.accounts.insert(id, account.clone());
        debug!(account_id = id, label = %account.label, "Account created");
        Ok(account)
    }

    fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut list: Vec<Account> = self.accounts.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|a| a.id);
        Ok(list)
    }

    fn update_account_delay(&self, id: AccountId, delay_secs: u32) -> Result<(), StoreError> {
        if delay_secs == 0 {
            return Err(StoreError::InvalidDelay);
        }
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.delay_secs = delay_secs;
        Ok(())
    }

    fn update_account_last_sent(
        &self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.last_sent = Some(at.to_rfc3339());
        Ok(())
    }

    fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let removed = self.accounts.remove(&id).is_some();
        if removed {
            debug!(account_id = id, "Account deleted");
        }
        Ok(removed)
    }

    fn create_contact(&self, identifier: &str) -> Result<Recipient, StoreError> {
        let id = self.next_contact_id.fetch_add(1, Ordering::SeqCst);
        let contact = Recipient {
            id,
            identifier: identifier.to_string(),
        };
        self.contacts.insert(id, contact.clone());
        Ok(contact)
    }

    fn contacts(&self) -> Result<Vec<Recipient>, StoreError> {
        let mut list: Vec<Recipient> = self.contacts.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|c| c.id);
        Ok(list)
    }

    fn create_message(&self, text: &str) -> Result<Message, StoreError> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        self.messages.insert(id, message.clone());
        Ok(message)
    }

    fn create_send_record(
        &self,
        account_id: AccountId,
        recipient_id: RecipientId,
        message_id: MessageId,
        status: SendStatus,
    ) -> Result<SendRecordId, StoreError> {
        let id = self.next_record_id.fetch_add(1, Ordering::SeqCst);
        let record = SendRecord {
            id,
            account_id,
            recipient_id,
            message_id,
            status,
            sent_at: Utc::now(),
        };
        self.records.insert(id, record);
        Ok(id)
    }

    fn send_history(&self) -> Result<Vec<SendRecord>, StoreError> {
        let mut list: Vec<SendRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        // Ids are monotonic, so newest first is descending id order.
        list.sort_by_key(|r| Reverse(r.id));
        Ok(list)
    }

    fn clear_send_history(&self) -> Result<u64, StoreError> {
        let removed = self.records.len() as u64;
        self.records.clear();
        debug!(removed, "Send history cleared");
        Ok(removed)
    }
}

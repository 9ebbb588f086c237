//! Shared index of live send-capable client handles, keyed by account id.
//!
//! The registry is the only mutable structure shared between wave execution
//! and unrelated control paths (a user authorizing or deleting an account
//! mid-campaign), so every mutation goes through one lock. Iteration order
//! is insertion order and doubles as the canonical account order for wave
//! planning.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use waveline_core::types::AccountId;
use waveline_transport::MessageTransport;

struct RegistryEntry {
    account_id: AccountId,
    handle: Arc<dyn MessageTransport>,
}

#[derive(Default)]
pub struct AccountRegistry {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the handle for an account. Replacement keeps the
    /// account's original position in the insertion order.
    pub fn register(&self, account_id: AccountId, handle: Arc<dyn MessageTransport>) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.account_id == account_id) {
            Some(entry) => {
                entry.handle = handle;
                debug!(account_id, "Replaced transport handle");
            }
            None => {
                entries.push(RegistryEntry { account_id, handle });
                debug!(account_id, "Registered transport handle");
            }
        }
    }

    /// Remove an account's handle, returning whether it was present.
    /// Disconnection runs on a background task; a teardown failure is
    /// logged and the removal stands regardless.
    pub fn unregister(&self, account_id: AccountId) -> bool {
        let handle = {
            let mut entries = self.entries.write();
            entries
                .iter()
                .position(|e| e.account_id == account_id)
                .map(|index| entries.remove(index).handle)
        };

        match handle {
            Some(handle) => {
                tokio::spawn(async move {
                    if let Err(error) = handle.disconnect().await {
                        warn!(account_id, %error, "Disconnect failed during unregister");
                    }
                });
                debug!(account_id, "Unregistered transport handle");
                true
            }
            None => false,
        }
    }

    /// Ids of accounts whose handles currently hold valid send credentials,
    /// in insertion order.
    pub fn available(&self) -> Vec<AccountId> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.handle.is_send_ready())
            .map(|e| e.account_id)
            .collect()
    }

    pub fn get(&self, account_id: AccountId) -> Option<Arc<dyn MessageTransport>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.account_id == account_id)
            .map(|e| Arc::clone(&e.handle))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

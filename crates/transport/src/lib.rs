//! Send primitive collaborator: the per-account provider connection the
//! dispatch engine drives.
//!
//! The engine never talks to a concrete provider; it holds
//! `Arc<dyn MessageTransport>` handles produced by whatever authorization
//! flow exists outside the scheduler. Flood control is reported as a
//! structured retry-after value, never parsed out of provider error text.

pub mod address;
pub mod script;
pub mod sim;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use address::{AddressError, RecipientAddress};
pub use script::ScriptedTransport;
pub use sim::SimulatedTransport;

/// Provider acknowledgement for one delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider_message_id: i64,
    pub sent_at: DateTime<Utc>,
}

/// Why a send attempt failed.
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// Permanent or unclassified provider failure; never retried.
    #[error("Send failed: {0}")]
    Generic(String),

    /// Provider-side throttle; the caller must wait before retrying.
    #[error("Flood control: retry after {}s", .retry_after.as_secs())]
    FloodControl { retry_after: Duration },
}

/// Failures outside the send path.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// A live, send-capable connection bound to one sender account.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Whether the handle currently holds valid send credentials.
    fn is_send_ready(&self) -> bool;

    /// Deliver `text` to `address` from this transport's account.
    async fn send(
        &self,
        address: &RecipientAddress,
        text: &str,
    ) -> Result<ProviderReceipt, SendError>;

    /// Tear down the underlying provider connection.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
